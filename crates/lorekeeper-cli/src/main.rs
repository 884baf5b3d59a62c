//! Lorekeeper CLI - Operational tooling for the campaign data store
//!
//! Inspect sync state, run integrity checks and repairs, and manage backups
//! from the terminal.

mod commands;
mod error;

use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, shells};

use commands::common::{open_stack, resolve_db_path};
use error::CliError;

#[derive(Parser)]
#[command(name = "lorekeeper")]
#[command(about = "Manage Lorekeeper's local campaign data store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local database file
    #[arg(long, value_name = "PATH", global = true)]
    db_path: Option<PathBuf>,

    /// Treat the store as offline (mutations queue instead of syncing)
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show storage and sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push queued mutations to the configured endpoint
    Sync,
    /// List unresolved sync conflicts
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one conflict by id
    Resolve {
        /// Conflict id
        id: String,
        /// Keep the local copy (default keeps the remote one)
        #[arg(long)]
        local: bool,
    },
    /// Data health checks
    #[command(subcommand)]
    Integrity(IntegrityCommands),
    /// Backup management
    #[command(subcommand)]
    Backup(BackupCommands),
    /// Export a full diagnostics report
    Diagnostics {
        /// Write to a file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum IntegrityCommands {
    /// Run a health check over all stored entities
    Check {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fix repairable issues found by a check
    Repair {
        /// Take a backup before repairing
        #[arg(long)]
        backup_first: bool,
        /// Proceed even when unrepairable critical issues are present
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Snapshot all entity collections
    Create {
        /// Label stored with the backup
        #[arg(long, default_value = "manual")]
        label: String,
    },
    /// List stored backups, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore a backup by id or unique id prefix
    Restore {
        /// Backup id or prefix
        id: String,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Shell {
    Bash,
    Zsh,
    Fish,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lorekeeper=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        match shell {
            Shell::Bash => generate(shells::Bash, &mut command, "lorekeeper", &mut io::stdout()),
            Shell::Zsh => generate(shells::Zsh, &mut command, "lorekeeper", &mut io::stdout()),
            Shell::Fish => generate(shells::Fish, &mut command, "lorekeeper", &mut io::stdout()),
        }
        return Ok(());
    }

    let db_path = resolve_db_path(cli.db_path);
    let stack = open_stack(&db_path, cli.offline).await?;

    match cli.command {
        Commands::Status { json } => commands::status::run_status(&stack, json).await?,
        Commands::Sync => commands::sync::run_sync(&stack).await?,
        Commands::Conflicts { json } => commands::sync::run_conflicts(&stack, json).await?,
        Commands::Resolve { id, local } => {
            commands::sync::run_resolve(&stack, &id, local).await?;
        }
        Commands::Integrity(IntegrityCommands::Check { json }) => {
            commands::integrity::run_check(&stack, json).await?;
        }
        Commands::Integrity(IntegrityCommands::Repair {
            backup_first,
            force,
        }) => {
            commands::integrity::run_repair(&stack, backup_first, force).await?;
        }
        Commands::Backup(BackupCommands::Create { label }) => {
            commands::backup::run_create(&stack, &label).await?;
        }
        Commands::Backup(BackupCommands::List { json }) => {
            commands::backup::run_list(&stack, json).await?;
        }
        Commands::Backup(BackupCommands::Restore { id }) => {
            commands::backup::run_restore(&stack, &id).await?;
        }
        Commands::Diagnostics { output } => {
            commands::diagnostics::run_diagnostics(&stack, output.as_deref()).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before opening the store"),
    }

    Ok(())
}
