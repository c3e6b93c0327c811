mod common;

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use town_migrate::backup::BACKUP_DIR;
use town_migrate::engine::{Engine, MigrationContext, RunPhase};
use town_migrate::errors::StepError;
use town_migrate::layout;
use town_migrate::logging::MemorySink;
use town_migrate::migrations::v0_1_to_v0_2;
use town_migrate::registry::Migration;
use town_migrate::steps::Step;

use common::{legacy_town, read, snapshot, town_json, write};

const MARKER_FILE: &str = "injected.txt";

/// Writes a marker file; can be told to fail in execute or verify.
#[derive(Debug)]
struct InjectedStep {
    fail_execute: bool,
    fail_verify: bool,
}

impl InjectedStep {
    fn failing_execute() -> Self {
        Self {
            fail_execute: true,
            fail_verify: false,
        }
    }

    fn failing_verify() -> Self {
        Self {
            fail_execute: false,
            fail_verify: true,
        }
    }
}

impl Step for InjectedStep {
    fn id(&self) -> &str {
        "injected"
    }

    fn description(&self) -> &str {
        "Write injected file"
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(!ctx.path(MARKER_FILE).exists())
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        if self.fail_execute {
            return Err(StepError::failed("injected execute failure"));
        }
        let path = ctx.path(MARKER_FILE);
        fs::write(&path, "injected").map_err(|err| StepError::io("writing", &path, err))
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let path = ctx.path(MARKER_FILE);
        fs::remove_file(&path).map_err(|err| StepError::io("removing", &path, err))
    }

    fn verify(&self, _ctx: &MigrationContext) -> Result<(), StepError> {
        if self.fail_verify {
            return Err(StepError::verification("injected verify failure"));
        }
        Ok(())
    }
}

/// The built-in migration with `step` inserted before the route rewrite.
fn builtin_with(step: InjectedStep) -> Migration {
    let mut migration = v0_1_to_v0_2::migration();
    migration.steps.insert(4, Box::new(step));
    migration
}

fn backup_count(root: &Path) -> usize {
    Engine::new(root).backups().list_backups().unwrap().len()
}

#[test]
fn legacy_town_migrates_end_to_end() {
    let town = legacy_town();
    let root = town.path();
    let engine = Engine::new(root);

    let result = engine.run(&v0_1_to_v0_2::migration(), false);

    assert!(result.success, "{:?}", result.error);
    assert!(!result.rolled_back);
    assert_eq!(result.from_version, "0.1.5");
    assert_eq!(result.to_version, "0.2.0");
    assert_eq!(result.completed_steps().len(), 6);
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);

    let config = town_json(root);
    assert_eq!(config["gt_version"], "0.2.0");
    assert_eq!(config["owner"], "ops");
    assert!(!root.join("town.json").exists());
    assert!(!root.join("rigs.json").exists());
    assert!(root.join("mayor/rigs.json").is_file());

    assert!(root.join("gastown/settings").is_dir());
    assert!(root.join(".runtime").is_dir());
    assert!(root.join("gastown/.runtime").is_dir());
    assert!(read(root, ".gitignore").contains(".runtime/"));
    assert!(!root.join(".gastown").exists());

    let routes = read(root, ".beads/routes.jsonl");
    assert!(routes.contains("\"hq-mayor\""));
    assert!(routes.contains("\"hq-deacon\""));
    assert!(routes.contains("\"gt-crew-1\""));

    let backup_dir = result.backup_path.expect("backup recorded");
    assert!(backup_dir.starts_with(root.join(BACKUP_DIR)));
    let (_, manifest) = engine.backups().latest_backup().unwrap();
    let backed_up: Vec<_> = manifest.files.iter().map(|f| f.original_path.as_str()).collect();
    assert_eq!(backed_up, ["town.json", "rigs.json", ".beads"]);
    assert_eq!(manifest.from_version, "0.1.5");
}

#[test]
fn move_step_records_its_changes() {
    let town = legacy_town();
    let result = Engine::new(town.path()).run(&v0_1_to_v0_2::migration(), false);

    let moved = result
        .steps
        .iter()
        .find(|s| s.step_id == "move-config-files")
        .unwrap();
    assert_eq!(
        moved.changes,
        [
            "moved town.json -> mayor/town.json",
            "moved rigs.json -> mayor/rigs.json"
        ]
    );
}

#[test]
fn rerun_skips_every_step_without_backup() {
    let town = legacy_town();
    let root = town.path();
    let engine = Engine::new(root);
    assert!(engine.run(&v0_1_to_v0_2::migration(), false).success);
    let marker_before = read(root, "mayor/town.json");
    let tree_before = snapshot(root);

    let rerun = engine.run(&v0_1_to_v0_2::migration(), false);

    assert!(rerun.success, "{:?}", rerun.error);
    assert_eq!(rerun.skipped_steps().len(), 6);
    assert!(rerun.backup_path.is_none());
    assert_eq!(backup_count(root), 1);
    assert_eq!(read(root, "mayor/town.json"), marker_before);
    assert_eq!(snapshot(root), tree_before);
}

#[test]
fn kept_legacy_leftovers_do_not_trigger_rerun() {
    let town = legacy_town();
    let root = town.path();
    write(root, "gastown/.gastown/state", "kept");
    let engine = Engine::new(root);
    let first = engine.run(&v0_1_to_v0_2::migration(), false);
    assert!(first.success, "{:?}", first.error);
    assert!(root.join("gastown/.gastown/state").is_file());

    let rerun = engine.run(&v0_1_to_v0_2::migration(), false);

    assert!(rerun.success, "{:?}", rerun.error);
    assert_eq!(rerun.skipped_steps().len(), 6);
    assert!(rerun.backup_path.is_none());
    assert_eq!(backup_count(root), 1);
}

#[test]
fn every_check_reports_done_after_migration() {
    let town = legacy_town();
    let engine = Engine::new(town.path());
    let migration = v0_1_to_v0_2::migration();
    assert!(engine.run(&migration, false).success);

    let preview = engine.preview(&migration).unwrap();

    assert_eq!(preview.pending_step_count(), 0);
    assert!(engine.pending_migrations().unwrap().is_empty());
    assert!(!engine.check().unwrap().needs_migration);
}

#[test]
fn dry_run_and_preview_leave_tree_untouched() {
    let town = legacy_town();
    let root = town.path();
    let before = snapshot(root);
    let engine = Engine::new(root);
    let migration = v0_1_to_v0_2::migration();

    let preview = engine.preview(&migration).unwrap();
    let result = engine.run(&migration, true);

    assert_eq!(preview.pending_step_count(), 6);
    assert!(result.success, "{:?}", result.error);
    assert!(result.backup_path.is_none());
    assert!(!root.join(BACKUP_DIR).exists());
    assert_eq!(snapshot(root), before);
}

#[test]
fn execute_failure_restores_pre_run_tree() {
    let town = legacy_town();
    let root = town.path();
    let before = snapshot(root);
    let sink = MemorySink::new();
    let engine = Engine::new(root).with_logger(sink.clone());

    let result = engine.run(&builtin_with(InjectedStep::failing_execute()), false);

    assert!(!result.success);
    assert!(result.rolled_back);
    assert!(result.rollback_errors.is_empty(), "{:?}", result.rollback_errors);
    assert_eq!(result.failed_phase, Some(RunPhase::Execute));
    assert_eq!(result.failed_step().unwrap().step_id, "injected");
    assert_eq!(snapshot(root), before);

    // Newest first.
    let lines = sink.lines();
    let position = |needle: &str| lines.iter().position(|l| l.contains(needle)).unwrap();
    assert!(
        position("Rolled back create-runtime-directories")
            < position("Rolled back create-mayor-directory")
    );
}

#[test]
fn verify_failure_rolls_back_the_failing_step_too() {
    let town = legacy_town();
    let root = town.path();
    let before = snapshot(root);

    let result = Engine::new(root).run(&builtin_with(InjectedStep::failing_verify()), false);

    assert!(!result.success);
    assert!(result.rolled_back);
    assert_eq!(result.failed_phase, Some(RunPhase::Verify));
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("step injected verify failed"));
    assert!(!root.join(MARKER_FILE).exists());
    assert_eq!(snapshot(root), before);
}

#[test]
fn marker_failure_rolls_back_all_steps() {
    let town = legacy_town();
    let root = town.path();
    // An array declares no version, so the layout is inferred as 0.1.0,
    // but the marker cannot be rewritten.
    write(root, "town.json", r#"["legacy"]"#);
    // Cleanup is not undone, so leave it nothing to remove.
    fs::remove_dir(root.join(".gastown")).unwrap();
    let before = snapshot(root);

    let result = Engine::new(root).run(&v0_1_to_v0_2::migration(), false);

    assert!(!result.success);
    assert_eq!(result.from_version, "0.1.0");
    assert_eq!(result.failed_phase, Some(RunPhase::VersionMarker));
    assert!(result.rolled_back);
    assert!(result.steps.iter().all(|s| s.success));
    assert_eq!(snapshot(root), before);
}

#[test]
fn failed_result_converts_to_error() {
    let town = legacy_town();
    let migration = builtin_with(InjectedStep::failing_execute());
    let result = Engine::new(town.path()).run(&migration, false);

    let err = result.ensure_success().unwrap_err();
    assert_eq!(
        err.to_string(),
        "migration v0_1_to_v0_2 failed during execute: \
         step injected execute failed: injected execute failure"
    );
}

#[test]
fn operator_rollback_restores_latest_backup() {
    let town = legacy_town();
    let root = town.path();
    let original_routes = read(root, ".beads/routes.jsonl");
    let engine = Engine::new(root);
    assert!(engine.run(&v0_1_to_v0_2::migration(), false).success);

    let restored_from = engine.rollback().unwrap();

    assert!(restored_from.starts_with(root.join(BACKUP_DIR)));
    assert_eq!(read(root, "town.json"), common::LEGACY_TOWN_JSON);
    assert_eq!(read(root, ".beads/routes.jsonl"), original_routes);
    assert!(root.join("rigs.json").is_file());
    assert!(!root.join(".restore-staging").exists());

    // Everything the migration created at backed-up locations is gone again.
    assert!(!root.join("mayor").exists());
    assert!(!root.join(".gitignore").exists());
    assert_eq!(layout::workspace_version(root).as_deref(), Some("0.1.5"));
    assert!(engine.check().unwrap().needs_migration);
}

#[test]
fn progress_goes_to_the_injected_sink() {
    let town = legacy_town();
    let sink = MemorySink::new();
    let engine = Engine::new(town.path()).with_logger(sink.clone());

    engine.run(&v0_1_to_v0_2::migration(), false);

    assert!(sink.contains("Creating backup..."));
    assert!(sink.contains("[1/6] Create mayor/ directory"));
    assert!(sink.contains("Updating workspace version to 0.2.0..."));
    assert!(sink.contains("All checks passed"));
}
