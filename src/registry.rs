//! Catalogue of migrations and resolution of migration chains.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::errors::RegistryError;
use crate::steps::Step;
use crate::version::Version;

/// Most migrations a single chain may contain.
pub const DEFAULT_MAX_HOPS: usize = 10;

/// An ordered list of steps taking any version matching `from_pattern`
/// to `to_version`.
#[derive(Debug)]
pub struct Migration {
    pub id: String,
    pub from_pattern: String,
    pub to_version: String,
    pub description: String,
    pub steps: Vec<Box<dyn Step>>,
}

impl Migration {
    pub fn new(
        id: impl Into<String>,
        from_pattern: impl Into<String>,
        to_version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from_pattern: from_pattern.into(),
            to_version: to_version.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn applies_to(&self, version: &Version) -> bool {
        version.matches_pattern(&self.from_pattern)
    }

    pub fn target(&self) -> Result<Version, RegistryError> {
        Version::parse(&self.to_version).map_err(|source| RegistryError::InvalidTarget {
            id: self.id.clone(),
            source,
        })
    }

    pub fn info(&self) -> MigrationInfo {
        MigrationInfo {
            id: self.id.clone(),
            from_pattern: self.from_pattern.clone(),
            to_version: self.to_version.clone(),
            description: self.description.clone(),
            step_count: self.steps.len(),
        }
    }
}

/// Summary of a registered migration, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationInfo {
    pub id: String,
    pub from_pattern: String,
    pub to_version: String,
    pub description: String,
    pub step_count: usize,
}

/// Registered migrations, in registration order.
///
/// Registration is expected at startup; lookups only take the read lock.
#[derive(Debug)]
pub struct Registry {
    migrations: RwLock<Vec<Arc<Migration>>>,
    max_hops: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_max_hops(DEFAULT_MAX_HOPS)
    }

    pub fn with_max_hops(max_hops: usize) -> Self {
        Self {
            migrations: RwLock::new(Vec::new()),
            max_hops: max_hops.max(1),
        }
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    pub fn register(&self, migration: Migration) -> Arc<Migration> {
        let migration = Arc::new(migration);
        log::debug!(
            "registered migration {} ({} -> {})",
            migration.id,
            migration.from_pattern,
            migration.to_version
        );
        self.migrations.write().push(Arc::clone(&migration));
        migration
    }

    pub fn len(&self) -> usize {
        self.migrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.read().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Migration>> {
        self.migrations.read().iter().find(|m| m.id == id).cloned()
    }

    /// First registered migration applicable to `from`.
    pub fn find_migration(&self, from: &Version) -> Result<Arc<Migration>, RegistryError> {
        self.migrations
            .read()
            .iter()
            .find(|m| m.applies_to(from))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(from.to_string()))
    }

    /// Chain of migrations taking `from` to at least `to`.
    ///
    /// Empty when `from` already satisfies `to`. A chain that cannot reach
    /// `to` is an error, never a partial result.
    pub fn migration_path(
        &self,
        from: &Version,
        to: &Version,
    ) -> Result<Vec<Arc<Migration>>, RegistryError> {
        self.migration_path_within(from, to, self.max_hops)
    }

    /// [`Registry::migration_path`] with an explicit hop bound.
    pub fn migration_path_within(
        &self,
        from: &Version,
        to: &Version,
        max_hops: usize,
    ) -> Result<Vec<Arc<Migration>>, RegistryError> {
        let max_hops = max_hops.max(1);
        let mut path: Vec<Arc<Migration>> = Vec::new();
        let mut current = from.clone();

        while current < *to {
            if path.len() >= max_hops {
                return Err(RegistryError::HopLimitExceeded {
                    from: from.to_string(),
                    to: to.to_string(),
                    max_hops,
                });
            }
            let Ok(next) = self.find_migration(&current) else {
                break;
            };
            current = next.target()?;
            path.push(next);
        }

        if current < *to {
            return Err(if path.is_empty() {
                RegistryError::NoPath {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            } else {
                RegistryError::Incomplete {
                    from: from.to_string(),
                    to: to.to_string(),
                    reached: current.to_string(),
                    path: path.iter().map(|m| m.id.clone()).collect(),
                }
            });
        }
        Ok(path)
    }

    /// Every migration applicable from `from` onwards, followed as far as
    /// the catalogue goes.
    pub fn chain_from(&self, from: &Version) -> Result<Vec<Arc<Migration>>, RegistryError> {
        self.chain_from_within(from, self.max_hops)
    }

    pub fn chain_from_within(
        &self,
        from: &Version,
        max_hops: usize,
    ) -> Result<Vec<Arc<Migration>>, RegistryError> {
        let max_hops = max_hops.max(1);
        let mut path: Vec<Arc<Migration>> = Vec::new();
        let mut current = from.clone();

        while let Ok(next) = self.find_migration(&current) {
            if path.len() >= max_hops {
                return Err(RegistryError::HopLimitExceeded {
                    from: from.to_string(),
                    to: next.to_version.clone(),
                    max_hops,
                });
            }
            current = next.target()?;
            path.push(next);
        }
        Ok(path)
    }

    pub fn list(&self) -> Vec<MigrationInfo> {
        self.migrations.read().iter().map(|m| m.info()).collect()
    }
}
