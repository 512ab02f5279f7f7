//! SiteSync CLI
//!
//! Command-line tools for site store maintenance.
//!
//! # Commands
//!
//! - `status` - Display store statistics and sync progress
//! - `outbox` - List captured changes and their flush state
//! - `verify` - Verify journal and snapshot integrity
//! - `compact` - Drop hub-accepted outbox records and fold the journal

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SiteSync command-line store tools.
#[derive(Parser)]
#[command(name = "sitesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the site store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics and sync progress
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List captured changes and their flush state
    Outbox {
        /// Include flushed records, not just pending ones
        #[arg(short, long)]
        all: bool,

        /// Maximum number of records to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify journal and snapshot integrity
    Verify,

    /// Drop hub-accepted outbox records and fold the journal
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Status { format } => {
            let path = cli.path.ok_or("Store path required for status")?;
            commands::status::run(&path, &format)?;
        }
        Commands::Outbox { all, limit, format } => {
            let path = cli.path.ok_or("Store path required for outbox")?;
            commands::outbox::run(&path, all, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("SiteSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Wire protocol v{}", sitesync_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
