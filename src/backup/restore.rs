//! Two-phase restore.
//!
//! Phase 1 copies every manifested item into a staging directory and never
//! touches live files, so a failure there leaves the workspace as it was.
//! Phase 2 swaps each staged item into place with [`AtomicSwap`], then
//! retires whatever has appeared at locations the backup recorded as absent.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{BackupManager, BackupManifest};
use crate::errors::BackupError;
use crate::fsops::{self, AtomicSwap};

pub const STAGING_DIR: &str = ".restore-staging";

/// Staging directory removed on drop, whichever way the restore ends.
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    fn create(path: PathBuf) -> Result<Self, BackupError> {
        match fs::remove_dir_all(&path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => {
                return Err(BackupError::io("cleaning", &path, err));
            }
            _ => {}
        }
        fs::create_dir_all(&path).map_err(|err| BackupError::io("creating", &path, err))?;
        Ok(Self { path })
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                log::warn!("could not remove {}: {}", self.path.display(), err);
            }
        }
    }
}

impl BackupManager {
    /// Restore every item listed in `backup_dir`'s manifest.
    pub fn restore_backup(&self, backup_dir: &Path) -> Result<BackupManifest, BackupError> {
        let manifest = BackupManifest::load(backup_dir)?;
        manifest.validate()?;

        let staging = StagingDir::create(self.town_root().join(STAGING_DIR))?;

        for file in &manifest.files {
            let src = backup_dir.join(&file.backup_path);
            let staged = staging.path.join(&file.original_path);
            fsops::copy_item(&src, &staged).map_err(|err| BackupError::io("staging", &src, err))?;
        }
        log::debug!("staged {} item(s) for restore", manifest.files.len());

        for file in &manifest.files {
            let staged = staging.path.join(&file.original_path);
            let live = self.town_root().join(&file.original_path);
            AtomicSwap::new(&staged, &live)
                .commit()
                .map_err(|err| BackupError::io("restoring", &live, err))?;
        }

        for rel in &manifest.absent_paths {
            let live = self.town_root().join(rel);
            if fsops::retire(&live).map_err(|err| BackupError::io("removing", &live, err))? {
                log::debug!("removed {} (absent at backup time)", live.display());
            }
        }

        log::info!(
            "restored {} item(s) from {}",
            manifest.files.len(),
            backup_dir.display()
        );
        Ok(manifest)
    }
}
