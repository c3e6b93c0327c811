use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable report (default)
    Terminal,
    /// Machine readable JSON
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "town-migrate")]
#[command(about = "Transactional layout migrations for town workspaces", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Town root to operate on
    #[arg(short, long, global = true, default_value = ".", env = "TOWN_ROOT")]
    pub root: PathBuf,

    /// Increase verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbosity: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show layout, version, pending migrations and backups
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "terminal")]
        format: OutputFormat,
    },

    /// Report whether the workspace needs migrating
    Check {
        /// Output format
        #[arg(short, long, value_enum, default_value = "terminal")]
        format: OutputFormat,
    },

    /// Show what each pending migration would do, without changing anything
    Preview {
        /// Output format
        #[arg(short, long, value_enum, default_value = "terminal")]
        format: OutputFormat,
    },

    /// Apply every pending migration in order
    Run {
        /// Check every step but change nothing
        #[arg(long)]
        dry_run: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "terminal")]
        format: OutputFormat,
    },

    /// Restore the most recent backup over the workspace
    Rollback,

    /// Run post-migration checks
    Verify {
        /// Include rig structure and the external health probe
        #[arg(long)]
        full: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "terminal")]
        format: OutputFormat,
    },

    /// Inspect or prune migration backups
    Backups {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Write a default .town-migrate.toml in the town root
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// List valid backups, oldest first
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "terminal")]
        format: OutputFormat,
    },

    /// Remove backups older than the retention period
    Prune {
        /// Override the configured retention, in days
        #[arg(long)]
        max_age_days: Option<u32>,
    },
}
