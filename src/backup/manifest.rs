use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::BackupError;
use crate::fsops;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Record of exactly what a backup contains.
///
/// A backup directory without a readable manifest is not a backup. New
/// fields must be optional so older readers keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub timestamp: DateTime<Utc>,
    pub from_version: String,
    pub to_version: String,
    pub town_root: PathBuf,
    pub files: Vec<BackupFile>,
    pub migration_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps_completed: Vec<String>,
    /// Backed-up locations that did not exist when the backup was taken.
    /// Restore removes whatever has appeared there since.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub absent_paths: Vec<String>,
}

/// One file or directory held by a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    /// Relative to the town root.
    pub original_path: String,
    /// Relative to the backup directory.
    pub backup_path: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_directory: bool,
    /// Bytes of file content, summed over the tree for directories.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl BackupManifest {
    pub fn path_in(backup_dir: &Path) -> PathBuf {
        backup_dir.join(MANIFEST_FILE)
    }

    pub fn load(backup_dir: &Path) -> Result<Self, BackupError> {
        let path = Self::path_in(backup_dir);
        let data = fs::read(&path).map_err(|err| BackupError::io("reading", &path, err))?;
        serde_json::from_slice(&data).map_err(|source| BackupError::Manifest { path, source })
    }

    /// Write as two-space indented JSON with a trailing newline.
    pub fn save(&self, backup_dir: &Path) -> Result<(), BackupError> {
        let path = Self::path_in(backup_dir);
        let mut data = serde_json::to_vec_pretty(self).map_err(|source| BackupError::Manifest {
            path: path.clone(),
            source,
        })?;
        data.push(b'\n');
        fsops::write_atomic(&path, &data).map_err(|err| BackupError::io("writing", &path, err))
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Check every path the manifest would make restore touch.
    pub fn validate(&self) -> Result<(), BackupError> {
        for file in &self.files {
            file.validate()?;
        }
        self.absent_paths.iter().try_for_each(|path| check_relative(path))
    }
}

impl BackupFile {
    /// Reject entries that could reach outside the town root or backup.
    pub fn validate(&self) -> Result<(), BackupError> {
        for path in [&self.original_path, &self.backup_path] {
            check_relative(path)?;
        }
        Ok(())
    }
}

fn check_relative(entry: &str) -> Result<(), BackupError> {
    if entry.is_empty() {
        return Err(BackupError::invalid_entry(entry, "empty path"));
    }
    let path = Path::new(entry);
    if path.is_absolute() {
        return Err(BackupError::invalid_entry(entry, "absolute path"));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(BackupError::invalid_entry(entry, "contains `..`"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(BackupError::invalid_entry(entry, "absolute path"));
            }
        }
    }
    Ok(())
}
