//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `config` - Show the effective configuration and its location
//! - `import` - Preview and import of CSV statements
//! - `serve` - Web server command
//! - `shared` - Shared utilities (config loading, backend selection, --map parsing)

pub mod config;
pub mod import;
pub mod serve;
pub mod shared;

// Re-export command functions for main.rs
pub use config::*;
pub use import::*;
pub use serve::*;
pub use shared::*;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
