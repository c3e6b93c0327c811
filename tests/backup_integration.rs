mod common;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use town_migrate::backup::{BackupManager, BackupManifest, BACKUP_DIR, MANIFEST_FILE};
use town_migrate::errors::BackupError;
use town_migrate::layout;

use common::{legacy_town, read, snapshot, write};

fn set_timestamp(dir: &Path, timestamp: chrono::DateTime<Utc>) {
    let mut manifest = BackupManifest::load(dir).unwrap();
    manifest.timestamp = timestamp;
    manifest.save(dir).unwrap();
}

#[test]
fn backups_are_listed_oldest_first_by_manifest_time() {
    let town = legacy_town();
    let manager = BackupManager::new(town.path());
    let dirs: Vec<PathBuf> = (0..3)
        .map(|_| manager.create_backup("v0_1_to_v0_2", "0.1.5", "0.2.0").unwrap().0)
        .collect();

    // Creation order and manifest order disagree on purpose.
    let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    set_timestamp(&dirs[2], t1);
    set_timestamp(&dirs[0], t1 + Duration::hours(1));
    set_timestamp(&dirs[1], t1 + Duration::hours(2));

    assert_eq!(
        manager.list_backups().unwrap(),
        vec![dirs[2].clone(), dirs[0].clone(), dirs[1].clone()]
    );
    let (latest, manifest) = manager.latest_backup().unwrap();
    assert_eq!(latest, dirs[1]);
    assert_eq!(manifest.timestamp, t1 + Duration::hours(2));
}

#[test]
fn quick_successive_backups_get_distinct_directories() {
    let town = legacy_town();
    let manager = BackupManager::new(town.path());

    let (first, _) = manager.create_backup("m", "0.1.5", "0.2.0").unwrap();
    let (second, _) = manager.create_backup("m", "0.1.5", "0.2.0").unwrap();

    assert_ne!(first, second);
    assert_eq!(manager.list_backups().unwrap().len(), 2);
}

#[test]
fn directories_without_valid_manifest_are_not_backups() {
    let town = legacy_town();
    let root = town.path();
    let manager = BackupManager::new(root);
    let (valid, _) = manager.create_backup("m", "0.1.5", "0.2.0").unwrap();

    fs::create_dir_all(root.join(BACKUP_DIR).join("20260101-000000-000-unfinished")).unwrap();
    write(root, &format!("{BACKUP_DIR}/20260101-000000-001-corrupt/{MANIFEST_FILE}"), "{not json");
    write(root, &format!("{BACKUP_DIR}/stray-file"), "");

    assert_eq!(manager.list_backups().unwrap(), vec![valid]);
}

#[test]
fn no_backups_is_an_error_for_latest() {
    let town = legacy_town();
    let manager = BackupManager::new(town.path());
    assert!(manager.list_backups().unwrap().is_empty());
    assert!(matches!(manager.latest_backup(), Err(BackupError::NoBackups(_))));
}

#[test]
fn prune_removes_only_expired_backups() {
    let town = legacy_town();
    let manager = BackupManager::new(town.path());
    let (old, _) = manager.create_backup("m", "0.1.5", "0.2.0").unwrap();
    let (recent, _) = manager.create_backup("m", "0.1.5", "0.2.0").unwrap();
    set_timestamp(&old, Utc::now() - Duration::days(40));

    let removed = manager.cleanup_old_backups(Duration::days(30)).unwrap();

    assert_eq!(removed, 1);
    assert!(!old.exists());
    assert_eq!(manager.list_backups().unwrap(), vec![recent]);
}

#[test]
fn restore_reproduces_backed_up_contents_and_version() {
    let town = legacy_town();
    let root = town.path();
    write(root, "gastown/.beads/issues.jsonl", "{\"id\":\"gt-1\"}\n");
    let before = snapshot(root);
    let manager = BackupManager::new(root);
    let (backup_dir, manifest) = manager.create_backup("m", "0.1.5", "0.2.0").unwrap();
    assert!(manifest.files.iter().any(|f| f.original_path == "gastown/.beads" && f.is_directory));

    write(root, "town.json", r#"{"name":"test-town","gt_version":"9.9.9"}"#);
    write(root, ".beads/routes.jsonl", "clobbered\n");
    write(root, ".beads/extra.jsonl", "new\n");
    fs::remove_file(root.join("rigs.json")).unwrap();
    fs::remove_dir_all(root.join("gastown/.beads")).unwrap();
    write(root, "mayor/town.json", r#"{"name":"test-town","gt_version":"0.2.0"}"#);
    write(root, ".gitignore", ".runtime/\n");

    let restored = manager.restore_backup(&backup_dir).unwrap();

    assert_eq!(restored, manifest);
    assert_eq!(snapshot(root), before);
    assert_eq!(layout::workspace_version(root).as_deref(), Some("0.1.5"));
    assert_eq!(read(root, "town.json"), common::LEGACY_TOWN_JSON);
}

#[test]
fn manifest_on_disk_is_pretty_json_with_trailing_newline() {
    let town = legacy_town();
    let manager = BackupManager::new(town.path());
    let (backup_dir, _) = manager.create_backup("m", "0.1.5", "0.2.0").unwrap();

    let raw = fs::read_to_string(backup_dir.join(MANIFEST_FILE)).unwrap();
    assert!(raw.starts_with("{\n  \"timestamp\": "));
    assert!(raw.ends_with("}\n"));
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["migration_id"], "m");
    assert_eq!(value["files"][0]["original_path"], "town.json");
}
