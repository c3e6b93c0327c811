use anyhow::{Context, Result};
use std::path::Path;

use super::{open_engine, print_json};
use crate::cli::OutputFormat;
use crate::engine::{MigrationPreview, MigrationResult, PreviewStatus};

pub fn status(root: &Path, format: OutputFormat) -> Result<()> {
    let engine = open_engine(root, format);
    let status = engine
        .status()
        .with_context(|| format!("Failed to read migration status of {}", root.display()))?;

    if format == OutputFormat::Json {
        return print_json(&status);
    }

    println!("Town root:       {}", engine.root().display());
    println!("Layout:          {}", status.layout_type);
    println!(
        "Version:         {}",
        status.current_version.as_deref().unwrap_or("unknown")
    );
    if status.needs_migration {
        println!("Migration:       needed ({})", status.available_path.join(" -> "));
    } else {
        println!("Migration:       not needed");
    }
    match &status.latest_backup_dir {
        Some(latest) => println!("Backups:         {} (latest {})", status.backup_count, latest),
        None => println!("Backups:         none"),
    }

    if !status.migrations.is_empty() {
        println!("\nRegistered migrations:");
        for info in &status.migrations {
            println!(
                "  {} ({} -> {}, {} steps): {}",
                info.id, info.from_pattern, info.to_version, info.step_count, info.description
            );
        }
    }
    Ok(())
}

pub fn check(root: &Path, format: OutputFormat) -> Result<()> {
    let engine = open_engine(root, format);
    let check = engine
        .check()
        .with_context(|| format!("Failed to check {}", root.display()))?;

    if format == OutputFormat::Json {
        return print_json(&check);
    }

    if check.needs_migration {
        println!(
            "Migration needed: {} -> {}",
            check.current_version.as_deref().unwrap_or("unknown"),
            check.target_version.as_deref().unwrap_or("unknown")
        );
        println!("  Path: {}", check.migration_path.join(" -> "));
    }
    println!("{}", check.message);
    Ok(())
}

pub fn preview(root: &Path, format: OutputFormat) -> Result<()> {
    let engine = open_engine(root, format);
    let pending = engine.pending_migrations()?;
    let previews = pending
        .iter()
        .map(|migration| engine.preview(migration))
        .collect::<crate::errors::Result<Vec<_>>>()?;

    if format == OutputFormat::Json {
        return print_json(&previews);
    }

    if previews.is_empty() {
        println!("Workspace is up to date");
    }
    for preview in &previews {
        print_preview(preview);
    }
    Ok(())
}

fn print_preview(preview: &MigrationPreview) {
    println!(
        "{} ({} -> {}): {}",
        preview.migration_id, preview.from_version, preview.to_version, preview.description
    );
    for step in &preview.steps {
        let marker = match step.status {
            PreviewStatus::Pending => "*",
            PreviewStatus::Skipped => "-",
            PreviewStatus::Error => "!",
        };
        match &step.message {
            Some(message) => {
                println!("  {marker} {} [{}] {message}", step.description, step.status)
            }
            None => println!("  {marker} {} [{}]", step.description, step.status),
        }
    }
    println!("  {} step(s) pending\n", preview.pending_step_count());
}

/// Apply pending migrations in order, stopping at the first failure.
///
/// A dry run only covers the first pending migration: later ones would be
/// checked against a layout they never see in a real run.
pub fn run(root: &Path, dry_run: bool, format: OutputFormat) -> Result<()> {
    let engine = open_engine(root, format);
    let pending = engine.pending_migrations()?;

    if pending.is_empty() {
        if format == OutputFormat::Json {
            return print_json(&Vec::<MigrationResult>::new());
        }
        println!("Workspace is up to date");
        return Ok(());
    }

    let batch = if dry_run { &pending[..1] } else { &pending[..] };
    let mut results = Vec::with_capacity(batch.len());
    for migration in batch {
        let result = engine.run(migration, dry_run);
        let success = result.success;
        results.push(result);
        if !success {
            break;
        }
    }

    if format == OutputFormat::Json {
        print_json(&results)?;
    } else {
        results.iter().for_each(print_result);
        if dry_run && pending.len() > 1 {
            println!(
                "{} further migration(s) follow once {} is applied",
                pending.len() - 1,
                pending[0].id
            );
        }
    }

    match results.last() {
        Some(last) => Ok(last.ensure_success()?),
        None => Ok(()),
    }
}

fn print_result(result: &MigrationResult) {
    let outcome = if result.success { "succeeded" } else { "FAILED" };
    println!(
        "\n{} ({} -> {}) {} in {}ms",
        result.migration_id,
        result.from_version,
        result.to_version,
        outcome,
        result.duration().num_milliseconds()
    );
    println!(
        "  {} step(s) applied, {} skipped",
        result.completed_steps().len(),
        result.skipped_steps().len()
    );
    for change in result.steps.iter().flat_map(|s| &s.changes) {
        println!("    {change}");
    }
    if let Some(backup) = &result.backup_path {
        println!("  Backup: {}", backup.display());
    }
    for warning in &result.warnings {
        println!("  Warning: {warning}");
    }
    if let Some(error) = &result.error {
        println!("  Error: {error}");
        if result.rolled_back {
            println!("  Completed steps were rolled back");
        }
        for failure in &result.rollback_errors {
            println!("  Rollback failure: {failure}");
        }
    }
}

pub fn rollback(root: &Path) -> Result<()> {
    let engine = open_engine(root, OutputFormat::Terminal);
    let backup_dir = engine
        .rollback()
        .with_context(|| format!("Failed to restore latest backup of {}", root.display()))?;
    log::info!("restored {}", backup_dir.display());
    Ok(())
}
