//! daqstore CLI
//!
//! Command-line tools for daqstore fragment files.
//!
//! # Commands
//!
//! - `inspect` - Display file statistics
//! - `dump` - Print events and their fragments
//! - `convert` - Rewrite a file in another layout

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// daqstore command-line file tools.
#[derive(Parser)]
#[command(name = "daqstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display file statistics
    Inspect {
        /// Data file to inspect
        file: PathBuf,

        /// Name resolver plugin (system, detector)
        #[arg(short, long, default_value = "system")]
        resolver: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print events and their fragments
    Dump {
        /// Data file to dump
        file: PathBuf,

        /// Maximum number of events to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Name resolver plugin (system, detector)
        #[arg(short, long, default_value = "system")]
        resolver: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite a file in another layout
    Convert {
        /// Source data file
        input: PathBuf,

        /// Destination data file
        output: PathBuf,

        /// Destination layout (ntuple, grouped)
        #[arg(short, long)]
        layout: String,

        /// Row width of the flat layout, in words
        #[arg(short, long)]
        words_per_row: Option<usize>,

        /// JSON dataset configuration for the destination
        #[arg(short, long)]
        config: Option<PathBuf>,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            file,
            resolver,
            format,
        } => {
            commands::inspect::run(&file, &resolver, &format)?;
        }
        Commands::Dump {
            file,
            limit,
            resolver,
            format,
        } => {
            commands::dump::run(&file, limit, &resolver, &format)?;
        }
        Commands::Convert {
            input,
            output,
            layout,
            words_per_row,
            config,
        } => {
            commands::convert::run(&input, &output, &layout, words_per_row, config.as_deref())?;
        }
        Commands::Version => {
            println!("daqstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("daqstore Core v{}", daqstore_core::VERSION);
        }
    }

    Ok(())
}
