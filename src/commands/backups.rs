use anyhow::{Context, Result};
use chrono::Duration;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::{open_engine, print_json};
use crate::cli::OutputFormat;

#[derive(Debug, Serialize)]
struct BackupEntry {
    path: PathBuf,
    timestamp: String,
    migration_id: String,
    from_version: String,
    to_version: String,
    files: usize,
    total_size: u64,
}

pub fn list_backups(root: &Path, format: OutputFormat) -> Result<()> {
    let engine = open_engine(root, format);
    let entries: Vec<BackupEntry> = engine
        .backups()
        .list_backups_with_manifests()
        .with_context(|| format!("Failed to list backups in {}", root.display()))?
        .into_iter()
        .map(|(path, manifest)| BackupEntry {
            timestamp: manifest.timestamp.to_rfc3339(),
            files: manifest.files.len(),
            total_size: manifest.total_size(),
            path,
            migration_id: manifest.migration_id,
            from_version: manifest.from_version,
            to_version: manifest.to_version,
        })
        .collect();

    if format == OutputFormat::Json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("No backups found");
    }
    for entry in &entries {
        println!(
            "{}  {}  {} -> {}  {} item(s), {} bytes",
            entry.timestamp,
            entry.migration_id,
            entry.from_version,
            entry.to_version,
            entry.files,
            entry.total_size
        );
        println!("    {}", entry.path.display());
    }
    Ok(())
}

/// Remove backups older than `max_age_days`, or the configured retention.
pub fn prune_backups(root: &Path, max_age_days: Option<u32>) -> Result<()> {
    let engine = open_engine(root, OutputFormat::Terminal);
    let max_age = match max_age_days {
        Some(days) => Duration::days(i64::from(days)),
        None => engine.config().retention(),
    };

    let removed = engine
        .backups()
        .cleanup_old_backups(max_age)
        .with_context(|| format!("Failed to prune backups in {}", root.display()))?;
    println!(
        "Removed {} backup(s) older than {} day(s)",
        removed,
        max_age.num_days()
    );
    Ok(())
}
