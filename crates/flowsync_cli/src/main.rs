//! FlowSync CLI
//!
//! Command-line tools for FlowSync engine snapshots.
//!
//! # Commands
//!
//! - `inspect` - Display queue, conflict and stats information
//! - `clear` - Drop every queued operation and open conflict
//! - `retry` - Put parked operations back in the queue
//! - `demo` - Run a simulated offline to online session

mod commands;

use clap::{Parser, Subcommand};
use flowsync_engine::DEFAULT_STORAGE_KEY;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// FlowSync command-line tools.
#[derive(Parser)]
#[command(name = "flowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the state directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Snapshot key inside the state directory
    #[arg(global = true, short, long, default_value = DEFAULT_STORAGE_KEY)]
    key: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display queue, conflict and stats information
    Inspect {
        /// List every queued operation
        #[arg(short, long)]
        operations: bool,

        /// List open conflicts
        #[arg(short, long)]
        conflicts: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Drop every queued operation and open conflict
    Clear {
        /// Show what would be dropped without changing the snapshot
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Put parked operations back in the queue
    Retry,

    /// Run a simulated offline to online session
    Demo {
        /// Transient failures the simulated backend reports before accepting
        #[arg(short, long, default_value = "0")]
        failures: usize,

        /// Base retry delay in milliseconds
        #[arg(long, default_value = "200")]
        retry_delay_ms: u64,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            operations,
            conflicts,
            format,
        } => {
            let path = cli.path.ok_or("State path required for inspect")?;
            commands::inspect::run(&path, &cli.key, operations, conflicts, &format)?;
        }
        Commands::Clear { dry_run } => {
            let path = cli.path.ok_or("State path required for clear")?;
            commands::clear::run(&path, &cli.key, dry_run)?;
        }
        Commands::Retry => {
            let path = cli.path.ok_or("State path required for retry")?;
            commands::retry::run(&path, &cli.key)?;
        }
        Commands::Demo {
            failures,
            retry_delay_ms,
        } => {
            commands::demo::run(failures, retry_delay_ms).await?;
        }
        Commands::Version => {
            println!("FlowSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
