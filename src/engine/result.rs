use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::errors::MigrateError;
use crate::layout::LayoutType;
use crate::registry::MigrationInfo;

/// Where in a run a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    Detect,
    Backup,
    Check,
    Execute,
    Verify,
    VersionMarker,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunPhase::Detect => "detect",
            RunPhase::Backup => "backup",
            RunPhase::Check => "check",
            RunPhase::Execute => "execute",
            RunPhase::Verify => "verify",
            RunPhase::VersionMarker => "version-marker",
        })
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_millis())
}

/// Outcome of one step within a run.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// What the step modified, relative to the town root.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
}

impl StepResult {
    pub(crate) fn new(step_id: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            success: false,
            skipped: false,
            message: None,
            error: None,
            duration: Duration::ZERO,
            changes: Vec::new(),
        }
    }
}

/// Outcome of a whole engine run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub success: bool,
    pub migration_id: String,
    pub from_version: String,
    pub to_version: String,
    pub steps: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub rolled_back: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<RunPhase>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rollback_errors: Vec<String>,
    /// Post-migration verification findings. Never affect `success`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MigrationResult {
    pub(crate) fn started(migration_id: &str, to_version: &str) -> Self {
        let now = Utc::now();
        Self {
            success: false,
            migration_id: migration_id.to_string(),
            from_version: String::new(),
            to_version: to_version.to_string(),
            steps: Vec::new(),
            backup_path: None,
            start_time: now,
            end_time: now,
            rolled_back: false,
            error: None,
            failed_phase: None,
            rollback_errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    /// The step that ended the run, if a step did.
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.success)
    }

    /// Steps that ran and succeeded.
    pub fn completed_steps(&self) -> Vec<&StepResult> {
        self.steps.iter().filter(|s| s.success && !s.skipped).collect()
    }

    pub fn skipped_steps(&self) -> Vec<&StepResult> {
        self.steps.iter().filter(|s| s.skipped).collect()
    }

    /// `Err` describing the failure for a run that did not succeed.
    pub fn ensure_success(&self) -> Result<(), MigrateError> {
        if self.success {
            return Ok(());
        }
        Err(MigrateError::RunFailed {
            migration_id: self.migration_id.clone(),
            phase: self.failed_phase.unwrap_or(RunPhase::Detect),
            message: self.error.clone().unwrap_or_default(),
        })
    }
}

/// Answer to "does this workspace need migrating, and how".
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub needs_migration: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub migration_path: Vec<String>,
    pub message: String,
    pub layout_type: LayoutType,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    pub layout_type: LayoutType,
    pub needs_migration: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available_path: Vec<String>,
    pub backup_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_backup_dir: Option<String>,
    pub migrations: Vec<MigrationInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStatus {
    Pending,
    Skipped,
    Error,
}

impl fmt::Display for PreviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PreviewStatus::Pending => "pending",
            PreviewStatus::Skipped => "skipped",
            PreviewStatus::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepPreview {
    pub id: String,
    pub description: String,
    pub status: PreviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What a migration would do, computed from step checks only.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPreview {
    pub migration_id: String,
    pub from_version: String,
    pub to_version: String,
    pub description: String,
    pub steps: Vec<StepPreview>,
}

impl MigrationPreview {
    pub fn pending_step_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == PreviewStatus::Pending)
            .count()
    }
}
