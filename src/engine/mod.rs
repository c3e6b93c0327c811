//! Runs migrations inside a backup and rollback envelope.
//!
//! A run detects the workspace version, takes a backup, then drives every
//! step through check, execute and verify. Any failure undoes the steps
//! completed so far, newest first, and the run reports the phase that
//! failed. Only a fully applied migration rewrites the version marker.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::backup::BackupManager;
use crate::config::MigrateConfig;
use crate::errors::{MigrateError, Result, StepError};
use crate::layout::{self, LayoutType};
use crate::logging::{LogSink, NullSink};
use crate::migrations;
use crate::registry::{Migration, Registry};
use crate::sink_log;
use crate::steps::Step;
use crate::verify::{VerificationResult, Verifier};
use crate::version::Version;

mod context;
pub mod marker;
mod result;

pub use context::MigrationContext;
pub use result::{
    CheckResult, MigrationPreview, MigrationResult, MigrationStatus, PreviewStatus, RunPhase,
    StepPreview, StepResult,
};

/// Why a run stopped.
struct Abort {
    phase: RunPhase,
    error: MigrateError,
}

impl Abort {
    fn new(phase: RunPhase, error: impl Into<MigrateError>) -> Self {
        Self {
            phase,
            error: error.into(),
        }
    }

    fn step(step_id: &str, phase: RunPhase, source: StepError) -> Self {
        Self {
            phase,
            error: MigrateError::step(step_id, phase, source),
        }
    }
}

pub struct Engine {
    town_root: PathBuf,
    registry: Arc<Registry>,
    backups: BackupManager,
    config: MigrateConfig,
    logger: Arc<dyn LogSink>,
}

impl Engine {
    /// Engine over the built-in migrations with default settings.
    pub fn new(town_root: impl Into<PathBuf>) -> Self {
        Self::with_registry(town_root, migrations::builtin_registry())
    }

    pub fn with_registry(town_root: impl Into<PathBuf>, registry: Arc<Registry>) -> Self {
        let town_root = town_root.into();
        Self {
            backups: BackupManager::new(town_root.clone()),
            town_root,
            registry,
            config: MigrateConfig::default(),
            logger: Arc::new(NullSink),
        }
    }

    pub fn with_config(mut self, config: MigrateConfig) -> Self {
        self.config = config;
        self
    }

    /// Where progress lines go. Defaults to nowhere.
    pub fn with_logger(mut self, logger: Arc<dyn LogSink>) -> Self {
        self.logger = logger;
        self
    }

    pub fn root(&self) -> &Path {
        &self.town_root
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// Apply `migration` to the workspace.
    ///
    /// Never panics and never returns early with an error: every outcome,
    /// including a failed detection, is described by the returned result.
    pub fn run(&self, migration: &Migration, dry_run: bool) -> MigrationResult {
        let mut result = MigrationResult::started(&migration.id, &migration.to_version);

        match self.run_steps(migration, dry_run, &mut result) {
            Ok(()) => result.success = true,
            Err(abort) => {
                sink_log!(self.logger, "Migration {} failed: {}", migration.id, abort.error);
                log::error!(
                    "migration {} failed during {}: {}",
                    migration.id,
                    abort.phase,
                    abort.error
                );
                result.failed_phase = Some(abort.phase);
                result.error = Some(abort.error.to_string());
            }
        }

        result.end_time = Utc::now();
        result
    }

    fn run_steps(
        &self,
        migration: &Migration,
        dry_run: bool,
        result: &mut MigrationResult,
    ) -> std::result::Result<(), Abort> {
        let (from_raw, from) = self
            .detect_version()
            .map_err(|err| Abort::new(RunPhase::Detect, err))?;
        result.from_version = from_raw.clone();
        let to = migration.target().map_err(|err| Abort::new(RunPhase::Detect, err))?;

        if !migration.applies_to(&from) {
            log::warn!(
                "workspace version {} does not match {} pattern {}",
                from,
                migration.id,
                migration.from_pattern
            );
        }

        let mut ctx = MigrationContext::new(&self.town_root, from.clone(), to.clone(), dry_run)
            .with_logger(Arc::clone(&self.logger));

        if dry_run {
            sink_log!(self.logger, "DRY RUN - no changes will be made");
        }

        // A check that errors counts as pending so the step loop reports it.
        let needs_work = from != to
            || migration
                .steps
                .iter()
                .any(|step| step.check(&ctx).unwrap_or(true));

        if !dry_run && needs_work {
            sink_log!(self.logger, "Creating backup...");
            let (backup_dir, manifest) = self
                .backups
                .create_backup(&migration.id, &from_raw, &migration.to_version)
                .map_err(|err| Abort::new(RunPhase::Backup, err))?;
            sink_log!(
                self.logger,
                "  Backed up {} item(s) to {}",
                manifest.files.len(),
                backup_dir.file_name().unwrap_or_default().to_string_lossy()
            );
            result.backup_path = Some(backup_dir.clone());
            ctx.backup_dir = Some(backup_dir);
        }

        let mut completed: Vec<&dyn Step> = Vec::new();
        let total = migration.steps.len();

        for (index, step) in migration.steps.iter().enumerate() {
            let step: &dyn Step = &**step;
            let started = Instant::now();
            let mut step_result = StepResult::new(step.id());
            sink_log!(self.logger, "[{}/{}] {}", index + 1, total, step.description());

            match step.check(&ctx) {
                Ok(true) => {}
                Ok(false) => {
                    step_result.success = true;
                    step_result.skipped = true;
                    step_result.message = Some("already done".to_string());
                    step_result.duration = started.elapsed();
                    result.steps.push(step_result);
                    sink_log!(self.logger, "  SKIPPED");
                    continue;
                }
                Err(err) => {
                    step_result.error = Some(err.to_string());
                    step_result.duration = started.elapsed();
                    result.steps.push(step_result);
                    sink_log!(self.logger, "  ERROR: check failed: {err}");
                    if !dry_run {
                        self.rollback_steps(&mut ctx, &completed, result);
                    }
                    return Err(Abort::step(step.id(), RunPhase::Check, err));
                }
            }

            if dry_run {
                step_result.message = Some("would run".to_string());
            } else {
                if let Err(err) = step.execute(&mut ctx) {
                    step_result.error = Some(err.to_string());
                    step_result.duration = started.elapsed();
                    result.steps.push(step_result);
                    sink_log!(self.logger, "  FAILED: {err}");
                    self.rollback_steps(&mut ctx, &completed, result);
                    return Err(Abort::step(step.id(), RunPhase::Execute, err));
                }

                step_result.changes = ctx
                    .step_state(step.id())
                    .map(|state| state.changes(&self.town_root))
                    .unwrap_or_default();

                if let Err(err) = step.verify(&ctx) {
                    step_result.error = Some(err.to_string());
                    step_result.duration = started.elapsed();
                    result.steps.push(step_result);
                    sink_log!(self.logger, "  VERIFY FAILED: {err}");
                    completed.push(step);
                    self.rollback_steps(&mut ctx, &completed, result);
                    return Err(Abort::step(step.id(), RunPhase::Verify, err));
                }
            }

            step_result.success = true;
            step_result.duration = started.elapsed();
            result.steps.push(step_result);
            completed.push(step);
            sink_log!(self.logger, "  OK");
        }

        if dry_run || !needs_work {
            return Ok(());
        }

        sink_log!(self.logger, "Updating workspace version to {}...", migration.to_version);
        if let Err(err) = marker::update_version_marker(&self.town_root, &migration.to_version) {
            sink_log!(self.logger, "  FAILED: {err}");
            self.rollback_steps(&mut ctx, &completed, result);
            return Err(Abort::new(RunPhase::VersionMarker, err));
        }

        if self.config.verify_after_migration {
            sink_log!(self.logger, "Running verification...");
            let verification = self.verifier().verify_quick();
            if verification.success {
                sink_log!(self.logger, "  All checks passed");
            } else {
                sink_log!(self.logger, "  WARNINGS:");
                for error in &verification.errors {
                    sink_log!(self.logger, "    - {error}");
                    log::warn!("post-migration verification: {error}");
                }
                result.warnings = verification.errors;
            }
        }

        Ok(())
    }

    /// Undo `steps` newest first. Failures are recorded and the remaining
    /// steps are still attempted.
    fn rollback_steps(
        &self,
        ctx: &mut MigrationContext,
        steps: &[&dyn Step],
        result: &mut MigrationResult,
    ) {
        if steps.is_empty() {
            return;
        }

        sink_log!(self.logger, "Rolling back {} step(s)...", steps.len());
        for step in steps.iter().rev() {
            match step.rollback(ctx) {
                Ok(()) => sink_log!(self.logger, "  Rolled back {}", step.id()),
                Err(err) => {
                    sink_log!(self.logger, "  Rolling back {} FAILED: {err}", step.id());
                    log::error!("rollback of step {} failed: {}", step.id(), err);
                    result.rollback_errors.push(format!("{}: {}", step.id(), err));
                }
            }
        }
        result.rolled_back = true;
    }

    fn detect_version(&self) -> Result<(String, Version)> {
        let raw = layout::workspace_version(&self.town_root).ok_or_else(|| {
            MigrateError::Detect(format!(
                "unknown workspace layout at {}",
                self.town_root.display()
            ))
        })?;
        let version = Version::parse(&raw)?;
        Ok((raw, version))
    }

    fn verifier(&self) -> Verifier {
        Verifier::new(&self.town_root).with_health_probe(self.config.health_probe.clone())
    }

    /// What `migration` would do, from step checks alone.
    pub fn preview(&self, migration: &Migration) -> Result<MigrationPreview> {
        let (from_raw, from) = self.detect_version()?;
        let to = migration.target()?;
        let ctx = MigrationContext::new(&self.town_root, from, to, true);

        let steps = migration
            .steps
            .iter()
            .map(|step| {
                let (status, message) = match step.check(&ctx) {
                    Ok(true) => (PreviewStatus::Pending, None),
                    Ok(false) => (PreviewStatus::Skipped, Some("already done".to_string())),
                    Err(err) => (PreviewStatus::Error, Some(err.to_string())),
                };
                StepPreview {
                    id: step.id().to_string(),
                    description: step.description().to_string(),
                    status,
                    message,
                }
            })
            .collect();

        Ok(MigrationPreview {
            migration_id: migration.id.clone(),
            from_version: from_raw,
            to_version: migration.to_version.clone(),
            description: migration.description.clone(),
            steps,
        })
    }

    /// Whether the workspace needs migrating, and through which chain.
    pub fn check(&self) -> Result<CheckResult> {
        let layout = layout::detect_layout(&self.town_root);
        let mut check = CheckResult {
            needs_migration: false,
            current_version: None,
            target_version: None,
            migration_path: Vec::new(),
            message: String::new(),
            layout_type: layout.layout_type,
        };

        if layout.layout_type == LayoutType::Unknown {
            check.message =
                "Unknown workspace layout - cannot determine migration needs".to_string();
            return Ok(check);
        }

        let Some(raw) = layout.effective_version() else {
            check.message = "Could not determine current version".to_string();
            return Ok(check);
        };
        check.current_version = Some(raw.clone());

        let Ok(current) = Version::parse(&raw) else {
            check.message = "Could not parse current version".to_string();
            return Ok(check);
        };

        let chain = self
            .registry
            .chain_from_within(&current, self.config.max_migration_hops)?;
        let Some(last) = chain.last() else {
            check.message = "Workspace is up to date".to_string();
            return Ok(check);
        };

        check.needs_migration = true;
        check.target_version = Some(last.to_version.clone());
        check.message = chain[0].description.clone();
        check.migration_path = chain.iter().map(|m| m.id.clone()).collect();
        Ok(check)
    }

    pub fn status(&self) -> Result<MigrationStatus> {
        let layout = layout::detect_layout(&self.town_root);
        let check = self.check()?;
        let backups = self.backups.list_backups().unwrap_or_else(|err| {
            log::warn!("listing backups: {}", err);
            Vec::new()
        });

        Ok(MigrationStatus {
            current_version: layout.effective_version(),
            layout_type: layout.layout_type,
            needs_migration: check.needs_migration,
            available_path: check.migration_path,
            backup_count: backups.len(),
            latest_backup_dir: backups
                .last()
                .and_then(|dir| dir.file_name())
                .map(|name| name.to_string_lossy().into_owned()),
            migrations: self.registry.list(),
        })
    }

    /// Migrations still to apply, in order.
    pub fn pending_migrations(&self) -> Result<Vec<Arc<Migration>>> {
        let (_, from) = self.detect_version()?;
        Ok(self
            .registry
            .chain_from_within(&from, self.config.max_migration_hops)?)
    }

    /// Restore the most recent backup over the workspace. Returns the
    /// backup directory used.
    pub fn rollback(&self) -> Result<PathBuf> {
        let (backup_dir, manifest) = self.backups.latest_backup()?;

        sink_log!(
            self.logger,
            "Restoring from backup: {}",
            backup_dir.file_name().unwrap_or_default().to_string_lossy()
        );
        sink_log!(self.logger, "  Created: {}", manifest.timestamp.to_rfc3339());
        sink_log!(self.logger, "  From version: {}", manifest.from_version);
        sink_log!(self.logger, "  Files: {}", manifest.files.len());

        self.backups.restore_backup(&backup_dir)?;
        sink_log!(self.logger, "Backup restored successfully");
        Ok(backup_dir)
    }

    /// Run the quick or full verifier against the workspace.
    pub fn verify(&self, full: bool) -> VerificationResult {
        let verifier = self.verifier();
        if full {
            verifier.verify()
        } else {
            verifier.verify_quick()
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("town_root", &self.town_root)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
