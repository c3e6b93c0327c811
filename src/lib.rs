//! Transactional layout migrations for town workspaces.
//!
//! A town workspace is a long-lived directory tree whose layout changes
//! between releases. This crate detects which layout a workspace uses,
//! resolves the chain of registered migrations that brings it up to date,
//! and applies each migration inside a backup/rollback envelope so that a
//! failed run leaves the workspace as it found it.
//!
//! The usual entry point is [`engine::Engine`]:
//!
//! ```no_run
//! use town_migrate::engine::Engine;
//!
//! let engine = Engine::new("/srv/town");
//! for migration in engine.pending_migrations()? {
//!     engine.run(&migration, false).ensure_success()?;
//! }
//! # Ok::<(), town_migrate::errors::MigrateError>(())
//! ```

pub mod backup;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fsops;
pub mod layout;
pub mod logging;
pub mod migrations;
pub mod registry;
pub mod steps;
pub mod verify;
pub mod version;

pub use engine::{Engine, MigrationResult};
pub use errors::{MigrateError, Result};
pub use registry::{Migration, Registry};
pub use steps::Step;
pub use version::Version;
