//! Workspace layout detection.
//!
//! Detection never fails: missing or unreadable evidence just pushes the
//! result toward [`LayoutType::Unknown`], and callers refuse to migrate an
//! unknown layout.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::version::Version;

pub const MAYOR_DIR: &str = "mayor";
pub const TOWN_CONFIG: &str = "town.json";
pub const RIGS_CONFIG: &str = "rigs.json";
pub const ACCOUNTS_CONFIG: &str = "accounts.json";
pub const BEADS_DIR: &str = ".beads";
pub const ROUTES_FILE: &str = "routes.jsonl";
pub const SETTINGS_DIR: &str = "settings";
pub const RUNTIME_DIR: &str = ".runtime";
pub const LEGACY_DIR: &str = ".gastown";
pub const GITIGNORE: &str = ".gitignore";

/// Field of the town config carrying the workspace version.
pub const VERSION_FIELD: &str = "gt_version";

/// Config files that live at the root in the legacy layout and under
/// `mayor/` in the current one.
pub const CONFIG_FILES: &[&str] = &[TOWN_CONFIG, RIGS_CONFIG, ACCOUNTS_CONFIG];

/// A top-level directory containing any of these is a rig.
pub const RIG_MARKERS: &[&str] = &["crew", "polecats", "witness", "refinery", "mayor/rig"];

/// Top-level directories that are never rigs. Dot-directories are skipped too.
pub const EXCLUDED_DIRS: &[&str] = &["mayor", "deacon", "docs", "plugins", "logs", "settings"];

/// Layout schema of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutType {
    /// Config at the root, single-level beads.
    LegacyV1,
    /// Config under `mayor/`, per-rig `settings/`.
    CurrentV2,
    Unknown,
}

impl LayoutType {
    /// Version assumed for a workspace whose config declares none.
    pub fn inferred_version(self) -> Option<&'static str> {
        match self {
            LayoutType::LegacyV1 => Some("0.1.0"),
            LayoutType::CurrentV2 => Some("0.2.0"),
            LayoutType::Unknown => None,
        }
    }

    fn from_declared(version: &Version) -> Option<Self> {
        if version.matches_pattern("0.1.x") {
            Some(LayoutType::LegacyV1)
        } else if version.matches_pattern("0.2.x") || version.matches_pattern("0.3.x") {
            Some(LayoutType::CurrentV2)
        } else {
            None
        }
    }
}

impl fmt::Display for LayoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayoutType::LegacyV1 => "legacy-v1",
            LayoutType::CurrentV2 => "current-v2",
            LayoutType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Snapshot of what [`detect_layout`] found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceLayout {
    pub layout_type: LayoutType,
    pub town_root: PathBuf,
    pub config_path: Option<PathBuf>,
    pub rigs_path: Option<PathBuf>,
    pub beads_path: Option<PathBuf>,
    /// Version declared by the town config, if any.
    pub version: Option<String>,
    pub rigs: Vec<PathBuf>,
    pub has_mayor_dir: bool,
    pub has_legacy_config: bool,
}

impl WorkspaceLayout {
    /// Declared version, or the one implied by the layout type.
    pub fn effective_version(&self) -> Option<String> {
        self.version
            .clone()
            .or_else(|| self.layout_type.inferred_version().map(str::to_string))
    }
}

/// Inspect `town_root` and classify its layout.
pub fn detect_layout(town_root: &Path) -> WorkspaceLayout {
    let mayor_dir = town_root.join(MAYOR_DIR);
    let has_mayor_dir = mayor_dir.is_dir();

    let root_config = town_root.join(TOWN_CONFIG);
    let has_legacy_config = root_config.exists();

    let mayor_config = mayor_dir.join(TOWN_CONFIG);
    let (config_path, rigs_path) = if mayor_config.exists() {
        (Some(mayor_config.clone()), Some(mayor_dir.join(RIGS_CONFIG)))
    } else if has_legacy_config {
        (Some(root_config), Some(town_root.join(RIGS_CONFIG)))
    } else {
        (None, None)
    };

    let version = config_path.as_deref().and_then(read_declared_version);
    let beads = town_root.join(BEADS_DIR);
    let beads_path = beads.exists().then_some(beads);
    let rigs = detect_rigs(town_root);

    let mut layout = WorkspaceLayout {
        layout_type: LayoutType::Unknown,
        town_root: town_root.to_path_buf(),
        config_path,
        rigs_path,
        beads_path,
        version,
        rigs,
        has_mayor_dir,
        has_legacy_config,
    };
    layout.layout_type = classify(&layout, mayor_config.exists());

    log::debug!(
        "detected {} layout at {} (declared version: {:?}, {} rig(s))",
        layout.layout_type,
        town_root.display(),
        layout.version,
        layout.rigs.len()
    );
    layout
}

fn classify(layout: &WorkspaceLayout, has_mayor_config: bool) -> LayoutType {
    if let Some(declared) = layout.version.as_deref() {
        if let Some(kind) = Version::parse(declared)
            .ok()
            .as_ref()
            .and_then(LayoutType::from_declared)
        {
            return kind;
        }
    }

    let mayor_without_legacy = layout.has_mayor_dir && !layout.has_legacy_config;
    let rig_has_settings = layout
        .rigs
        .iter()
        .any(|rig| rig.join(SETTINGS_DIR).exists());
    if mayor_without_legacy || rig_has_settings {
        return LayoutType::CurrentV2;
    }

    if layout.has_legacy_config {
        return LayoutType::LegacyV1;
    }

    if layout.has_mayor_dir && has_mayor_config {
        return LayoutType::CurrentV2;
    }

    LayoutType::Unknown
}

/// Read the version field from a town config, ignoring any failure.
pub fn read_declared_version(config_path: &Path) -> Option<String> {
    let data = fs::read(config_path).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&data).ok()?;
    value
        .get(VERSION_FIELD)?
        .as_str()
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Rig directories directly under `town_root`, sorted by path.
pub fn detect_rigs(town_root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(town_root) else {
        return Vec::new();
    };

    let mut rigs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            !name.starts_with('.') && !EXCLUDED_DIRS.contains(&name.as_ref())
        })
        .map(|entry| entry.path())
        .filter(|path| RIG_MARKERS.iter().any(|marker| path.join(marker).exists()))
        .collect();

    rigs.sort();
    rigs
}

/// The workspace version, declared or inferred. `None` for unknown layouts.
pub fn workspace_version(town_root: &Path) -> Option<String> {
    detect_layout(town_root).effective_version()
}
