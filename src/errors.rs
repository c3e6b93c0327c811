//! Error types for migration operations.
//!
//! Each concern gets its own enum so callers can match on the failure they
//! care about. [`MigrateError`] wraps all of them for code that only needs
//! to propagate.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::engine::RunPhase;

/// Failure to parse a version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("invalid version format: {0:?}")]
    InvalidFormat(String),
}

/// Failure to find or chain migrations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no migration found for version {0}")]
    NotFound(String),

    #[error("no migration path from {from} to {to}")]
    NoPath { from: String, to: String },

    #[error(
        "migration path from {from} stops at {reached}, short of {to} (via {})",
        .path.join(" -> ")
    )]
    Incomplete {
        from: String,
        to: String,
        reached: String,
        path: Vec<String>,
    },

    #[error("migration path from {from} to {to} exceeds {max_hops} hops")]
    HopLimitExceeded {
        from: String,
        to: String,
        max_hops: usize,
    },

    #[error("migration {id} declares an invalid target version")]
    InvalidTarget {
        id: String,
        #[source]
        source: VersionError,
    },
}

/// Failure inside a single step's check, execute, verify or rollback.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("{0}")]
    Failed(String),

    #[error("{source}; undoing partial work also failed: {undo}")]
    UndoFailed {
        #[source]
        source: Box<StepError>,
        undo: Box<StepError>,
    },
}

impl StepError {
    /// Attach the offending path to an I/O failure.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Fold the outcome of a step undoing its own partial work into this
    /// error, so stranded files are not reported as a plain failure.
    pub fn with_undo(self, undo: std::result::Result<(), StepError>) -> Self {
        match undo {
            Ok(()) => self,
            Err(undo) => Self::UndoFailed {
                source: Box::new(self),
                undo: Box::new(undo),
            },
        }
    }
}

/// Failure while creating, reading, restoring or pruning backups.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid backup manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("backup manifest entry {entry:?} rejected: {reason}")]
    InvalidEntry { entry: String, reason: String },

    #[error("no backups found in {}", .0.display())]
    NoBackups(PathBuf),

    #[error("copy of {} failed verification", .0.display())]
    CopyMismatch(PathBuf),
}

impl BackupError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn invalid_entry(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            entry: entry.into(),
            reason: reason.into(),
        }
    }
}

/// Failure to read or rewrite the persisted version marker.
#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} is not a JSON object", .0.display())]
    NotAnObject(PathBuf),
}

impl MarkerError {
    pub fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error("step {step_id} {phase} failed: {source}")]
    Step {
        step_id: String,
        phase: RunPhase,
        #[source]
        source: StepError,
    },

    #[error("detecting workspace version: {0}")]
    Detect(String),

    #[error("migration {migration_id} failed during {phase}: {message}")]
    RunFailed {
        migration_id: String,
        phase: RunPhase,
        message: String,
    },
}

impl MigrateError {
    pub fn step(step_id: impl Into<String>, phase: RunPhase, source: StepError) -> Self {
        Self::Step {
            step_id: step_id.into(),
            phase,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
