// Shared fixtures for town-migrate integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tempfile::TempDir;
use walkdir::WalkDir;

use town_migrate::backup::BACKUP_DIR;

pub const LEGACY_TOWN_JSON: &str = r#"{"name":"test-town","gt_version":"0.1.5","owner":"ops"}"#;
pub const ROUTES: &str = concat!(
    "{\"id\":\"gt-mayor\",\"rig\":\"town\"}\n",
    "{\"id\":\"gt-deacon\",\"rig\":\"town\"}\n",
    "{\"id\":\"gt-crew-1\",\"rig\":\"gastown\"}\n",
);

/// Write `contents` at `rel`, creating parent directories.
pub fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// A 0.1.5 town: root-level configs, beads routes and one rig.
pub fn legacy_town() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "town.json", LEGACY_TOWN_JSON);
    write(root, "rigs.json", r#"{"rigs":["gastown"]}"#);
    write(root, ".beads/routes.jsonl", ROUTES);
    fs::create_dir_all(root.join("gastown/crew")).unwrap();
    fs::create_dir_all(root.join(".gastown")).unwrap();
    tmp
}

/// A town already on the 0.2.0 layout.
pub fn current_town() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "mayor/town.json", r#"{"name":"test-town","gt_version":"0.2.0"}"#);
    write(root, "mayor/rigs.json", "{}");
    fs::create_dir_all(root.join("gastown/crew")).unwrap();
    fs::create_dir_all(root.join("gastown/settings")).unwrap();
    tmp
}

/// Every path under `root` with file contents; directories map to `None`.
/// Backups are left out since a run is expected to add them.
pub fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != BACKUP_DIR)
        .map(|entry| entry.unwrap())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            let contents = entry
                .file_type()
                .is_file()
                .then(|| fs::read(entry.path()).unwrap());
            (rel, contents)
        })
        .collect()
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

pub fn town_json(root: &Path) -> serde_json::Value {
    serde_json::from_str(&read(root, "mayor/town.json")).unwrap()
}
