//! The step lifecycle and the concrete steps migrations are built from.
//!
//! A step is checked, executed, verified and, if a later part of the run
//! fails, rolled back. Whatever a step needs to undo its own work is kept
//! as a typed [`StepState`] in the run's [`MigrationContext`], keyed by the
//! step id, so nothing leaks between steps or between runs.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::engine::MigrationContext;
use crate::errors::StepError;
use crate::fsops;

mod dirs;
mod move_files;
mod rewrite;

pub use dirs::{CleanupEmptyDirStep, CreateDirStep, RigSubdirStep, RuntimeDirsStep};
pub use move_files::MoveFilesStep;
pub use rewrite::RewriteContentStep;

/// One unit of migration work.
pub trait Step: Send + Sync + fmt::Debug {
    /// Stable identifier, unique within a migration.
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether the step still has work to do. Must be idempotent and must
    /// not touch the filesystem.
    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError>;

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError>;

    /// Undo a completed `execute`. Best effort: the engine logs failures
    /// and carries on with the remaining steps.
    fn rollback(&self, _ctx: &mut MigrationContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Confirm the postcondition of `execute`.
    fn verify(&self, _ctx: &MigrationContext) -> Result<(), StepError> {
        Ok(())
    }
}

/// What a step changed, recorded for its own rollback.
#[derive(Debug, Clone)]
pub enum StepState {
    CreatedDirs(Vec<PathBuf>),
    RemovedDirs(Vec<PathBuf>),
    MovedFiles(Vec<MovedFile>),
    FileSnapshot(FileSnapshot),
    RuntimeDirs {
        created: Vec<PathBuf>,
        gitignore: Option<FileSnapshot>,
    },
}

impl StepState {
    /// Human readable list of changes, with paths relative to `root`.
    pub fn changes(&self, root: &Path) -> Vec<String> {
        let rel = |path: &Path| path.strip_prefix(root).unwrap_or(path).display().to_string();
        match self {
            StepState::CreatedDirs(dirs) => {
                dirs.iter().map(|d| format!("created {}/", rel(d))).collect()
            }
            StepState::RemovedDirs(dirs) => {
                dirs.iter().map(|d| format!("removed {}/", rel(d))).collect()
            }
            StepState::MovedFiles(moves) => moves
                .iter()
                .map(|m| format!("moved {} -> {}", rel(&m.src), rel(&m.dst)))
                .collect(),
            StepState::FileSnapshot(snapshot) => vec![format!("rewrote {}", rel(&snapshot.path))],
            StepState::RuntimeDirs { created, gitignore } => {
                let mut changes: Vec<String> =
                    created.iter().map(|d| format!("created {}/", rel(d))).collect();
                if let Some(snapshot) = gitignore {
                    changes.push(format!("updated {}", rel(&snapshot.path)));
                }
                changes
            }
        }
    }
}

/// A single move performed by a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovedFile {
    pub src: PathBuf,
    pub dst: PathBuf,
}

/// Exact bytes and permissions of a file before a step touched it.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: PathBuf,
    /// `None` when the file did not exist.
    pub original: Option<Vec<u8>>,
    pub permissions: Option<fs::Permissions>,
}

impl FileSnapshot {
    pub fn capture(path: &Path) -> io::Result<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(Self {
                path: path.to_path_buf(),
                original: Some(bytes),
                permissions: Some(fs::metadata(path)?.permissions()),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self {
                path: path.to_path_buf(),
                original: None,
                permissions: None,
            }),
            Err(err) => Err(err),
        }
    }

    /// Put the file back exactly as captured, deleting it if it did not
    /// exist at capture time.
    pub fn restore(&self) -> io::Result<()> {
        match &self.original {
            Some(bytes) => {
                fsops::write_atomic(&self.path, bytes)?;
                if let Some(permissions) = &self.permissions {
                    fs::set_permissions(&self.path, permissions.clone())?;
                }
                Ok(())
            }
            None => match fs::remove_file(&self.path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
                _ => Ok(()),
            },
        }
    }
}

/// `Ok(false)` for a missing path, the error for anything else unreadable.
pub(crate) fn path_exists(path: &Path) -> Result<bool, StepError> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StepError::io("inspecting", path, err)),
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
