//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Import bank statements and reconcile them with existing payments
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "CSV import and reconciliation for Tally", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to the data-dir override, then built-in defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse, map, validate and match a CSV without submitting anything
    Preview {
        /// CSV file to read
        #[arg(short, long)]
        file: PathBuf,

        /// Source format: generic, chase, bofa, amex (detected if not specified)
        #[arg(long)]
        format: Option<String>,

        /// Override a column mapping, e.g. --map "Histórico=description"
        #[arg(short, long = "map", value_name = "COL=FIELD")]
        maps: Vec<String>,

        /// Only show rows whose description, reference or amount contains this text
        #[arg(short, long)]
        search: Option<String>,

        /// Only show rows matched to an existing payment
        #[arg(long)]
        only_matches: bool,

        /// Use an empty in-memory backend instead of the configured one
        #[arg(long)]
        offline: bool,

        /// Write the visible rows to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export format: csv or json
        #[arg(long, default_value = "csv")]
        export_format: String,
    },

    /// Import a CSV: create new payments and reconcile matched ones
    Import {
        /// CSV file to import
        #[arg(short, long)]
        file: PathBuf,

        /// Source format: generic, chase, bofa, amex (detected if not specified)
        #[arg(long)]
        format: Option<String>,

        /// Override a column mapping, e.g. --map "Histórico=description"
        #[arg(short, long = "map", value_name = "COL=FIELD")]
        maps: Vec<String>,

        /// Leave a row out of the batch (row number as shown by preview)
        #[arg(long = "exclude", value_name = "ROW")]
        exclude: Vec<usize>,

        /// Create matched rows as new payments instead of reconciling them
        #[arg(long)]
        include_matched: bool,

        /// Pause between backend calls (overrides submission.delay_ms)
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Use an empty in-memory backend instead of the configured one
        #[arg(long)]
        offline: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, the server requires an API key (TALLY_API_KEYS).
        #[arg(long)]
        no_auth: bool,

        /// Directory containing static files to serve (e.g., ui/dist)
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the override file location
    Path,
}
