//! Tally CLI - CSV import and reconciliation
//!
//! Usage:
//!   tally preview --file CSV   Show how a statement maps and matches
//!   tally import --file CSV    Submit a statement to the payment backend
//!   tally serve --port 3000    Start web server
//!   tally config show          Print the effective configuration

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Preview {
            file,
            format,
            maps,
            search,
            only_matches,
            offline,
            output,
            export_format,
        } => {
            let options = commands::PreviewOptions {
                source: commands::SourceOptions {
                    file,
                    format,
                    maps,
                    offline,
                },
                search,
                only_matches,
                output,
                export_format: export_format.parse()?,
            };
            commands::cmd_preview(config, &options).await
        }
        Commands::Import {
            file,
            format,
            maps,
            exclude,
            include_matched,
            delay_ms,
            offline,
            yes,
        } => {
            let options = commands::ImportOptions {
                source: commands::SourceOptions {
                    file,
                    format,
                    maps,
                    offline,
                },
                exclude,
                include_matched,
                delay_ms,
                yes,
            };
            commands::cmd_import(config, &options).await.map(|_| ())
        }
        Commands::Serve {
            port,
            host,
            no_auth,
            static_dir,
        } => commands::cmd_serve(config, &host, port, no_auth, static_dir.as_deref()).await,
        Commands::Config { action } => match action {
            None | Some(ConfigAction::Show) => commands::cmd_config_show(&config),
            Some(ConfigAction::Path) => commands::cmd_config_path(&config),
        },
    }
}
