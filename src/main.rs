use anyhow::Result;
use clap::Parser;
use town_migrate::cli::{BackupCommands, Cli, Commands};
use town_migrate::commands;
use town_migrate::logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbosity);

    let root = cli.root.as_path();
    match cli.command {
        Commands::Status { format } => commands::status(root, format),
        Commands::Check { format } => commands::check(root, format),
        Commands::Preview { format } => commands::preview(root, format),
        Commands::Run { dry_run, format } => commands::run(root, dry_run, format),
        Commands::Rollback => commands::rollback(root),
        Commands::Verify { full, format } => commands::verify(root, full, format),
        Commands::Backups { command } => match command {
            BackupCommands::List { format } => commands::list_backups(root, format),
            BackupCommands::Prune { max_age_days } => commands::prune_backups(root, max_age_days),
        },
        Commands::Init { force } => commands::init_config(root, force),
    }
}
