//! 0.1.x to 0.2.0: config moves under `mayor/`, rigs gain `settings/` and
//! `.runtime/`, agent routes switch to the `hq-` prefix.

use crate::layout::{
    BEADS_DIR, CONFIG_FILES, LEGACY_DIR, MAYOR_DIR, ROUTES_FILE, SETTINGS_DIR, TOWN_CONFIG,
};
use crate::registry::Migration;
use crate::steps::{
    CleanupEmptyDirStep, CreateDirStep, MoveFilesStep, RewriteContentStep, RigSubdirStep,
    RuntimeDirsStep,
};

pub const ID: &str = "v0_1_to_v0_2";

const AGENT_ROUTE_RENAMES: &[(&str, &str)] = &[
    (r#""gt-mayor""#, r#""hq-mayor""#),
    (r#""gt-deacon""#, r#""hq-deacon""#),
];

pub fn migration() -> Migration {
    let routes = std::path::Path::new(BEADS_DIR).join(ROUTES_FILE);

    Migration::new(
        ID,
        "0.1.x",
        "0.2.0",
        "Migrate to two-level beads and directory reorganization",
    )
    .with_step(CreateDirStep::new(
        "create-mayor-directory",
        "Create mayor/ directory",
        MAYOR_DIR,
    ))
    .with_step(MoveFilesStep::new(
        "move-config-files",
        "Move config files to mayor/",
        CONFIG_FILES,
        "",
        MAYOR_DIR,
        TOWN_CONFIG,
    ))
    .with_step(RigSubdirStep::new(
        "create-rig-settings",
        "Create settings/ directories in rigs",
        SETTINGS_DIR,
    ))
    .with_step(RuntimeDirsStep::new(
        "create-runtime-directories",
        "Create .runtime/ directories",
    ))
    .with_step(RewriteContentStep::new(
        "migrate-agent-beads",
        "Migrate agent beads to hq-* prefix",
        routes,
        AGENT_ROUTE_RENAMES,
    ))
    .with_step(CleanupEmptyDirStep::new(
        "cleanup-legacy",
        "Clean up legacy directories",
        LEGACY_DIR,
    ))
}
