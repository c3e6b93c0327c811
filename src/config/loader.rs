use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use super::{EnvironmentSnapshot, MigrateConfig};

pub const CONFIG_FILE: &str = ".town-migrate.toml";

/// Read config file contents
pub(crate) fn read_config_file(path: &Path) -> Result<String, std::io::Error> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Parse and validate config from a TOML string
pub fn parse_and_validate_config(contents: &str) -> Result<MigrateConfig, String> {
    let config = toml::from_str::<MigrateConfig>(contents)
        .map_err(|e| format!("Failed to parse {}: {}", CONFIG_FILE, e))?;
    config
        .validate()
        .map_err(|e| format!("Invalid {}: {}", CONFIG_FILE, e))?;
    Ok(config.normalize())
}

/// Try loading config from a specific path
pub fn try_load_config_from_path(config_path: &Path) -> Option<MigrateConfig> {
    let contents = match read_config_file(config_path) {
        Ok(contents) => contents,
        Err(e) => {
            handle_read_error(config_path, &e);
            return None;
        }
    };

    match parse_and_validate_config(&contents) {
        Ok(config) => {
            log::debug!("Loaded config from {}", config_path.display());
            Some(config)
        }
        Err(e) => {
            log::warn!("{}. Using defaults.", e);
            None
        }
    }
}

/// Only actual failures are logged, not a missing file
fn handle_read_error(config_path: &Path, error: &std::io::Error) {
    if error.kind() != std::io::ErrorKind::NotFound {
        log::warn!(
            "Failed to read config file {}: {}",
            config_path.display(),
            error
        );
    }
}

/// Config for the town at `town_root`: file values, then environment
/// overrides.
pub fn load_config(town_root: &Path) -> MigrateConfig {
    try_load_config_from_path(&town_root.join(CONFIG_FILE))
        .unwrap_or_default()
        .apply_env(&EnvironmentSnapshot::from_current_env())
}
