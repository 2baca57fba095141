//! Shared utilities for commands
//!
//! - `load_config` - Resolve the import configuration
//! - `open_backend` - Build the payment backend (or an offline one)
//! - `parse_mapping_arg` - Parse a `COL=FIELD` override

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{BackendClient, PaymentBackend, SystemField, TallyConfig};

/// Load config from `--config`, the data-dir override, or the embedded defaults
pub fn load_config(path: Option<&Path>) -> Result<TallyConfig> {
    TallyConfig::load_from(path).context("Failed to load configuration")
}

/// Configured backend, or an empty in-memory one with `--offline`
pub fn open_backend(config: &TallyConfig, offline: bool) -> Result<BackendClient> {
    if offline {
        return Ok(BackendClient::memory());
    }
    let backend =
        BackendClient::from_config(&config.backend).context("Failed to set up payment backend")?;
    tracing::debug!(backend = backend.name(), host = backend.host(), "Payment backend ready");
    Ok(backend)
}

/// Parse `COL=FIELD`; the column may itself contain '=' (split on the last one)
pub fn parse_mapping_arg(arg: &str) -> Result<(String, SystemField)> {
    let (column, field) = arg
        .rsplit_once('=')
        .with_context(|| format!("Invalid mapping '{}', expected COL=FIELD", arg))?;
    let column = column.trim();
    if column.is_empty() {
        anyhow::bail!("Invalid mapping '{}': empty column name", arg);
    }
    let field: SystemField = field.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    Ok((column.to_string(), field))
}
