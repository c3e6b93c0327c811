//! Manifested workspace backups taken before a migration mutates anything.
//!
//! Layout on disk:
//!
//! ```text
//! <town>/.migration-backup/<YYYYMMDD-HHMMSS-mmm>-<migration id>/
//!     manifest.json
//!     town.json
//!     mayor/...
//! ```
//!
//! The manifest is written last, so a directory without one is a backup
//! that never finished and is ignored by listing and restore.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};

use crate::errors::BackupError;
use crate::fsops;
use crate::layout::{self, BEADS_DIR, CONFIG_FILES, GITIGNORE, MAYOR_DIR};

mod manifest;
mod restore;

pub use manifest::{BackupFile, BackupManifest, MANIFEST_FILE};
pub use restore::STAGING_DIR;

pub const BACKUP_DIR: &str = ".migration-backup";

/// Creates, lists, restores and prunes backups of one workspace.
#[derive(Debug, Clone)]
pub struct BackupManager {
    town_root: PathBuf,
}

impl BackupManager {
    pub fn new(town_root: impl Into<PathBuf>) -> Self {
        Self {
            town_root: town_root.into(),
        }
    }

    pub fn town_root(&self) -> &Path {
        &self.town_root
    }

    pub fn backup_root(&self) -> PathBuf {
        self.town_root.join(BACKUP_DIR)
    }

    /// Items worth backing up, relative to the town root. Missing ones are
    /// recorded as absent so restore can clear them again.
    fn backup_items(&self) -> Vec<String> {
        let mut items: Vec<String> = CONFIG_FILES.iter().map(|f| f.to_string()).collect();
        items.extend([MAYOR_DIR, BEADS_DIR, GITIGNORE].map(String::from));

        for rig in layout::detect_rigs(&self.town_root) {
            let Some(name) = rig.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            items.push(format!("{name}/{BEADS_DIR}"));
            items.push(format!("{name}/{MAYOR_DIR}/rig/{BEADS_DIR}"));
        }
        items
    }

    /// Reserve a fresh backup directory, adding a numeric suffix if another
    /// backup was taken in the same millisecond.
    fn reserve_dir(&self, stem: &str) -> Result<PathBuf, BackupError> {
        let root = self.backup_root();
        fs::create_dir_all(&root).map_err(|err| BackupError::io("creating", &root, err))?;

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                stem.to_string()
            } else {
                format!("{stem}-{attempt}")
            };
            let candidate = root.join(name);
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(BackupError::io("creating", &candidate, err)),
            }
        }
    }

    /// Copy the workspace-critical files into a new backup directory.
    ///
    /// Any failure removes the partial backup before returning.
    pub fn create_backup(
        &self,
        migration_id: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<(PathBuf, BackupManifest), BackupError> {
        let timestamp = Utc::now();
        let stem = format!("{}-{}", timestamp.format("%Y%m%d-%H%M%S-%3f"), migration_id);
        let backup_dir = self.reserve_dir(&stem)?;

        let mut manifest = BackupManifest {
            timestamp,
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            town_root: self.town_root.clone(),
            files: Vec::new(),
            migration_id: migration_id.to_string(),
            steps_completed: Vec::new(),
            absent_paths: Vec::new(),
        };

        let result = self
            .copy_items(&backup_dir, &mut manifest)
            .and_then(|()| manifest.save(&backup_dir));

        if let Err(err) = result {
            if let Err(cleanup_err) = fs::remove_dir_all(&backup_dir) {
                log::warn!(
                    "could not remove partial backup {}: {}",
                    backup_dir.display(),
                    cleanup_err
                );
            }
            return Err(err);
        }

        log::info!(
            "backed up {} item(s) to {}",
            manifest.files.len(),
            backup_dir.display()
        );
        Ok((backup_dir, manifest))
    }

    fn copy_items(
        &self,
        backup_dir: &Path,
        manifest: &mut BackupManifest,
    ) -> Result<(), BackupError> {
        for item in self.backup_items() {
            let src = self.town_root.join(&item);
            let meta = match fs::symlink_metadata(&src) {
                Ok(meta) => meta,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    manifest.absent_paths.push(item);
                    continue;
                }
                Err(err) => return Err(BackupError::io("inspecting", &src, err)),
            };

            let dst = backup_dir.join(&item);
            let size = fsops::copy_item(&src, &dst)
                .map_err(|err| BackupError::io("backing up", &src, err))?;
            manifest.files.push(BackupFile {
                original_path: item.clone(),
                backup_path: item,
                is_directory: meta.is_dir(),
                size,
            });
        }
        Ok(())
    }

    /// Valid backups with their manifests, oldest first.
    pub fn list_backups_with_manifests(
        &self,
    ) -> Result<Vec<(PathBuf, BackupManifest)>, BackupError> {
        let root = self.backup_root();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BackupError::io("reading", &root, err)),
        };

        let mut backups: Vec<(PathBuf, BackupManifest)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter_map(|path| match BackupManifest::load(&path) {
                Ok(manifest) => Some((path, manifest)),
                Err(err) => {
                    log::debug!("ignoring {}: {}", path.display(), err);
                    None
                }
            })
            .collect();

        backups.sort_by(|(a_path, a), (b_path, b)| {
            a.timestamp.cmp(&b.timestamp).then_with(|| a_path.cmp(b_path))
        });
        Ok(backups)
    }

    /// Valid backup directories, oldest first by manifest timestamp.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>, BackupError> {
        Ok(self
            .list_backups_with_manifests()?
            .into_iter()
            .map(|(path, _)| path)
            .collect())
    }

    pub fn latest_backup(&self) -> Result<(PathBuf, BackupManifest), BackupError> {
        self.list_backups_with_manifests()?
            .pop()
            .ok_or_else(|| BackupError::NoBackups(self.backup_root()))
    }

    pub fn cleanup_backup(&self, backup_dir: &Path) -> Result<(), BackupError> {
        fs::remove_dir_all(backup_dir).map_err(|err| BackupError::io("removing", backup_dir, err))
    }

    /// Remove backups whose manifest is older than `max_age`. Returns how
    /// many were removed.
    pub fn cleanup_old_backups(&self, max_age: Duration) -> Result<usize, BackupError> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;
        for (path, manifest) in self.list_backups_with_manifests()? {
            if manifest.timestamp < cutoff {
                self.cleanup_backup(&path)?;
                log::info!("pruned backup {}", path.display());
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn legacy_town() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("town.json"), r#"{"name":"t","gt_version":"0.1.5"}"#).unwrap();
        fs::write(tmp.path().join("rigs.json"), "{}").unwrap();
        fs::create_dir_all(tmp.path().join(".beads")).unwrap();
        fs::write(tmp.path().join(".beads/routes.jsonl"), "{}\n").unwrap();
        fs::create_dir_all(tmp.path().join("alpha/crew")).unwrap();
        fs::create_dir_all(tmp.path().join("alpha/.beads")).unwrap();
        fs::write(tmp.path().join("alpha/.beads/issues.jsonl"), "x").unwrap();
        tmp
    }

    #[test]
    fn backup_records_existing_items_only() {
        let town = legacy_town();
        let manager = BackupManager::new(town.path());

        let (dir, manifest) = manager.create_backup("v0_1_to_v0_2", "0.1.5", "0.2.0").unwrap();

        let paths: Vec<_> = manifest.files.iter().map(|f| f.original_path.as_str()).collect();
        assert_eq!(paths, ["town.json", "rigs.json", ".beads", "alpha/.beads"]);
        assert_eq!(
            manifest.absent_paths,
            ["accounts.json", "mayor", ".gitignore", "alpha/mayor/rig/.beads"]
        );
        assert!(manifest.files[2].is_directory);
        assert!(dir.join("alpha/.beads/issues.jsonl").exists());
        assert!(dir.join(MANIFEST_FILE).exists());
        assert_eq!(manager.list_backups().unwrap(), vec![dir]);
    }

    #[test]
    fn directories_without_manifest_are_ignored() {
        let town = legacy_town();
        let manager = BackupManager::new(town.path());
        fs::create_dir_all(manager.backup_root().join("20260101-000000-000-broken")).unwrap();

        assert!(manager.list_backups().unwrap().is_empty());
        assert!(matches!(manager.latest_backup(), Err(BackupError::NoBackups(_))));
    }

    #[test]
    fn same_millisecond_backups_get_distinct_dirs() {
        let town = legacy_town();
        let manager = BackupManager::new(town.path());
        let first = manager.reserve_dir("20260101-000000-000-m").unwrap();
        let second = manager.reserve_dir("20260101-000000-000-m").unwrap();
        assert_ne!(first, second);
        assert!(second.ends_with("20260101-000000-000-m-1"));
    }

    #[cfg(unix)]
    #[test]
    fn failed_copy_leaves_no_partial_backup() {
        use std::os::unix::fs::PermissionsExt;

        let town = legacy_town();
        let unreadable = town.path().join(".beads/routes.jsonl");
        fs::set_permissions(&unreadable, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&unreadable).is_ok() {
            // permissions are not enforced for this user
            return;
        }

        let manager = BackupManager::new(town.path());
        let result = manager.create_backup("v0_1_to_v0_2", "0.1.5", "0.2.0");
        fs::set_permissions(&unreadable, fs::Permissions::from_mode(0o644)).unwrap();

        assert!(result.is_err());
        let leftovers: Vec<_> = fs::read_dir(manager.backup_root()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
