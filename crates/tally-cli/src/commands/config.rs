//! Config command implementations

use anyhow::Result;
use tally_core::config::default_config_path;
use tally_core::TallyConfig;

pub fn cmd_config_show(config: &TallyConfig) -> Result<()> {
    match config.source {
        Some(ref path) => println!("# Loaded from {}", path.display()),
        None => println!("# Built-in defaults"),
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

pub fn cmd_config_path(config: &TallyConfig) -> Result<()> {
    match default_config_path() {
        Some(path) => {
            let status = if path.exists() { "exists" } else { "not created" };
            println!("{} ({})", path.display(), status);
        }
        None => println!("No data directory available on this platform"),
    }
    if let Some(ref source) = config.source {
        println!("In use: {}", source.display());
    }
    Ok(())
}
