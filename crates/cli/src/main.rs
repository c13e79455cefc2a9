//! Stockbook CLI - migrations and ledger management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! stockbook migrate
//!
//! # Register workflow
//! stockbook register create "Durables 2026"
//! stockbook register list
//! stockbook register delete "Durables 2026"
//!
//! # Allocation status report
//! stockbook report
//! stockbook report --fully-allocated
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `PostgreSQL` connection string (also read from `.env`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "stockbook")]
#[command(version, about = "Stockbook ledger tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage stock registers
    Register {
        #[command(subcommand)]
        action: RegisterAction,
    },
    /// Print the allocation status report
    Report {
        /// Only items with zero remaining quantity
        #[arg(long, conflicts_with = "not_fully_allocated")]
        fully_allocated: bool,

        /// Only items with remaining quantity
        #[arg(long)]
        not_fully_allocated: bool,
    },
}

#[derive(Subcommand)]
enum RegisterAction {
    /// Create an empty register
    Create {
        /// Register name
        name: String,
    },
    /// Delete an empty register
    Delete {
        /// Register name
        name: String,
    },
    /// List registers with item counts and total value
    List,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Register { action } => match action {
            RegisterAction::Create { name } => commands::registers::create(&name).await?,
            RegisterAction::Delete { name } => commands::registers::delete(&name).await?,
            RegisterAction::List => commands::registers::list().await?,
        },
        Commands::Report {
            fully_allocated,
            not_fully_allocated,
        } => commands::report::run(fully_allocated, not_fully_allocated).await?,
    }
    Ok(())
}
