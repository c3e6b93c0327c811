//! CLI command implementations.
//!
//! Each submodule handles one subcommand: it builds an [`Engine`] for the
//! requested town root, calls into the library and prints the outcome.
//! No migration logic lives here.
//!
//! Available commands:
//! - **status / check / preview / run / rollback**: migration lifecycle
//! - **verify**: post-migration checks
//! - **backups**: list and prune backups
//! - **init**: write a default `.town-migrate.toml`

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::config;
use crate::engine::Engine;
use crate::logging::{LogSink, StdoutSink, TracingSink};

pub mod backups;
pub mod init;
pub mod migrate;
pub mod verify;

pub use backups::{list_backups, prune_backups};
pub use init::init_config;
pub use migrate::{check, preview, rollback, run, status};
pub use verify::verify;

/// Engine for `root` using its config file and environment overrides.
///
/// Progress goes to stdout for terminal output and to the tracing
/// subscriber when stdout is reserved for JSON.
pub fn open_engine(root: &Path, format: OutputFormat) -> Engine {
    let logger: Arc<dyn LogSink> = match format {
        OutputFormat::Terminal => Arc::new(StdoutSink),
        OutputFormat::Json => Arc::new(TracingSink),
    };
    Engine::new(root)
        .with_config(config::load_config(root))
        .with_logger(logger)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
