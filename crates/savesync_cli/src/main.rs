//! SaveSync CLI
//!
//! Command-line tools for temp record archives.
//!
//! # Commands
//!
//! - `inspect` - Display pending saves per player and phase
//! - `verify` - Verify frame checksums and stored save hashes
//! - `compact` - Rewrite the archive with only live records
//! - `dump` - Dump archive frames for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SaveSync command-line archive tools.
#[derive(Parser)]
#[command(name = "savesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the archive file
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
    /// Display pending saves per player and phase
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify frame checksums and stored save hashes
    Verify,

    /// Rewrite the archive with only live records
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump archive frames for debugging
    Dump {
        /// Maximum number of frames to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Start from this byte offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Archive path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Archive path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Archive path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Dump {
            limit,
            offset,
            format,
        } => {
            let path = cli.path.ok_or("Archive path required for dump")?;
            commands::dump::run(&path, limit, offset, &format)?;
        }
        Commands::Version => {
            println!("SaveSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Archive frames: [len u32][op u8][cbor payload][crc32], {} bytes overhead",
                savesync_engine::FRAME_OVERHEAD
            );
        }
    }

    Ok(())
}
