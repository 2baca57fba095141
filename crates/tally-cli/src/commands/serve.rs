//! Server command implementation

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{PaymentBackend, TallyConfig};

use super::open_backend;

pub async fn cmd_serve(
    config: TallyConfig,
    host: &str,
    port: u16,
    no_auth: bool,
    static_dir: Option<&Path>,
) -> Result<()> {
    let backend = open_backend(&config, false)?;

    println!("🚀 Starting Tally import server...");
    println!("   Payment backend: {} ({})", backend.name(), backend.host());
    println!("   Listening: http://{}:{}", host, port);
    if let Some(dir) = static_dir {
        println!("   Static files: {}", dir.display());
    }

    // Parse API keys from environment (comma-separated)
    let api_keys =
        tally_server::parse_api_keys(&std::env::var(tally_server::ENV_API_KEYS).unwrap_or_default());

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else if api_keys.is_empty() {
        println!(
            "   🔒 Authentication: API key required, but none configured ({})",
            tally_server::ENV_API_KEYS
        );
    } else {
        println!(
            "   🔑 API keys: {} configured ({})",
            api_keys.len(),
            tally_server::ENV_API_KEYS
        );
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let server_config = tally_server::ServerConfig {
        require_auth: !no_auth,
        allowed_origins: vec![],
        api_keys,
    };

    let static_dir_str = match static_dir {
        Some(p) => Some(
            p.to_str()
                .with_context(|| format!("Static dir is not valid UTF-8: {}", p.display()))?,
        ),
        None => None,
    };
    tally_server::serve_with_config(backend, config, host, port, static_dir_str, server_config)
        .await?;

    Ok(())
}
