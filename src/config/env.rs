use std::collections::HashMap;

pub const PREFIX: &str = "TOWN_MIGRATE_";
pub const MAX_HOPS: &str = "TOWN_MIGRATE_MAX_HOPS";
pub const RETENTION_DAYS: &str = "TOWN_MIGRATE_RETENTION_DAYS";
pub const HEALTH_PROBE: &str = "TOWN_MIGRATE_HEALTH_PROBE";
pub const SKIP_VERIFY: &str = "TOWN_MIGRATE_SKIP_VERIFY";

/// Environment variable snapshot for configuration resolution
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSnapshot {
    /// Map of environment variable names to values
    pub vars: HashMap<String, String>,
}

impl EnvironmentSnapshot {
    /// Create snapshot of current environment
    pub fn from_current_env() -> Self {
        let vars = std::env::vars()
            .filter(|(key, _)| key.starts_with(PREFIX))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { vars }
    }

    /// Get environment variable value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Check if environment variable is set to "true"
    pub fn is_true(&self, key: &str) -> bool {
        self.get(key).unwrap_or("").eq_ignore_ascii_case("true")
    }
}
