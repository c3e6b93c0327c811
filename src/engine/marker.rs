//! The persisted workspace version in `mayor/town.json`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::MarkerError;
use crate::fsops;
use crate::layout::{MAYOR_DIR, TOWN_CONFIG, VERSION_FIELD};

pub fn marker_path(town_root: &Path) -> PathBuf {
    town_root.join(MAYOR_DIR).join(TOWN_CONFIG)
}

/// Set the version field, keeping every other field, their order and the
/// file's permissions. The file is replaced by rename, never rewritten in
/// place.
pub fn update_version_marker(town_root: &Path, version: &str) -> Result<(), MarkerError> {
    let path = marker_path(town_root);
    let data = fs::read(&path).map_err(|err| MarkerError::io("reading", &path, err))?;
    let mut config: serde_json::Value = serde_json::from_slice(&data).map_err(|source| {
        MarkerError::Parse {
            path: path.clone(),
            source,
        }
    })?;

    let object = config
        .as_object_mut()
        .ok_or_else(|| MarkerError::NotAnObject(path.clone()))?;
    object.insert(VERSION_FIELD.to_string(), serde_json::Value::from(version));

    let mut updated = serde_json::to_vec_pretty(&config).map_err(|source| MarkerError::Parse {
        path: path.clone(),
        source,
    })?;
    updated.push(b'\n');

    fsops::write_atomic(&path, &updated).map_err(|err| MarkerError::io("writing", &path, err))
}
