//! Tool configuration.
//!
//! Settings come from an optional `.town-migrate.toml` at the town root,
//! then `TOWN_MIGRATE_*` environment variables on top. A missing or broken
//! file is never fatal; defaults are used instead.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::registry::DEFAULT_MAX_HOPS;

mod env;
mod loader;

pub use env::EnvironmentSnapshot;
pub use loader::{load_config, parse_and_validate_config, try_load_config_from_path, CONFIG_FILE};

pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_HEALTH_PROBE: &str = "bd";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Longest migration chain accepted before resolution gives up.
    pub max_migration_hops: usize,
    /// Age after which `backups prune` removes a backup.
    pub backup_retention_days: u32,
    /// External tool probed by full verification. `None` skips the probe.
    pub health_probe: Option<String>,
    /// Run the quick verifier after a successful migration.
    pub verify_after_migration: bool,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            max_migration_hops: DEFAULT_MAX_HOPS,
            backup_retention_days: DEFAULT_RETENTION_DAYS,
            health_probe: Some(DEFAULT_HEALTH_PROBE.to_string()),
            verify_after_migration: true,
        }
    }
}

impl MigrateConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_migration_hops == 0 {
            return Err("max_migration_hops must be at least 1".to_string());
        }
        Ok(())
    }

    /// A blank probe name means "no probe".
    pub(crate) fn normalize(mut self) -> Self {
        if matches!(&self.health_probe, Some(probe) if probe.trim().is_empty()) {
            self.health_probe = None;
        }
        self
    }

    /// Overlay `TOWN_MIGRATE_*` variables. Unparseable values are ignored
    /// with a warning.
    pub fn apply_env(mut self, env: &EnvironmentSnapshot) -> Self {
        if let Some(raw) = env.get(env::MAX_HOPS) {
            match raw.parse::<usize>() {
                Ok(hops) if hops > 0 => self.max_migration_hops = hops,
                _ => log::warn!(
                    "ignoring {}={:?}: expected a positive integer",
                    env::MAX_HOPS,
                    raw
                ),
            }
        }
        if let Some(raw) = env.get(env::RETENTION_DAYS) {
            match raw.parse::<u32>() {
                Ok(days) => self.backup_retention_days = days,
                Err(_) => log::warn!(
                    "ignoring {}={:?}: expected a number of days",
                    env::RETENTION_DAYS,
                    raw
                ),
            }
        }
        if let Some(probe) = env.get(env::HEALTH_PROBE) {
            self.health_probe = (!probe.trim().is_empty()).then(|| probe.trim().to_string());
        }
        if env.is_true(env::SKIP_VERIFY) {
            self.verify_after_migration = false;
        }
        self
    }

    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.backup_retention_days))
    }
}
