//! Built-in migrations.

use std::sync::Arc;

use crate::registry::Registry;

pub mod v0_1_to_v0_2;

/// Register every built-in migration, oldest first.
pub fn register_builtin(registry: &Registry) {
    registry.register(v0_1_to_v0_2::migration());
}

/// A registry holding the built-in migrations.
pub fn builtin_registry() -> Arc<Registry> {
    builtin_registry_with_max_hops(crate::registry::DEFAULT_MAX_HOPS)
}

pub fn builtin_registry_with_max_hops(max_hops: usize) -> Arc<Registry> {
    let registry = Registry::with_max_hops(max_hops);
    register_builtin(&registry);
    Arc::new(registry)
}
