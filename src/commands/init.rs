use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::CONFIG_FILE;

const DEFAULT_CONFIG: &str = r#"# town-migrate configuration

# Longest chain of migrations applied in one go
max_migration_hops = 10

# Age in days after which `backups prune` removes a backup
backup_retention_days = 30

# Tool probed by `verify --full`; set to "" to skip the probe
health_probe = "bd"

# Run quick checks after every successful migration
verify_after_migration = true
"#;

pub fn init_config(root: &Path, force: bool) -> Result<()> {
    let config_path = root.join(CONFIG_FILE);

    if config_path.exists() && !force {
        anyhow::bail!("Configuration file already exists. Use --force to overwrite.");
    }

    fs::write(&config_path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
    println!("Created {} configuration file", CONFIG_FILE);

    Ok(())
}
