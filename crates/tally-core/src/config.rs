//! Import configuration
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. An explicit path (`--config`), or the override in the data dir
//!    (~/.local/share/tally/config/import.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Environment variables are applied last:
//! - `TALLY_BACKEND`: `remote` or `memory`
//! - `TALLY_BACKEND_URL`: remote backend base URL
//! - the token variable named by `backend.token_env` is read when the
//!   backend client is built

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::DEFAULT_TIMEOUT_SECS;
use crate::error::{Error, Result};
use crate::matching::{MatchConfig, MAX_SCORE};
use crate::session::SessionOptions;

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/import.toml");

pub const ENV_BACKEND: &str = "TALLY_BACKEND";
pub const ENV_BACKEND_URL: &str = "TALLY_BACKEND_URL";
pub const DEFAULT_TOKEN_ENV: &str = "TALLY_BACKEND_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Remote,
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "remote" | "http" => Ok(Self::Remote),
            "memory" | "mem" | "offline" => Ok(Self::Memory),
            other => Err(Error::Config(format!("Unknown backend kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timeout_secs: u64,
    pub token_env: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionConfig {
    pub delay_ms: u64,
}

impl SubmissionConfig {
    pub fn delay(&self) -> Option<std::time::Duration> {
        (self.delay_ms > 0).then(|| std::time::Duration::from_millis(self.delay_ms))
    }
}

/// Full import configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TallyConfig {
    pub matching: MatchConfig,
    pub session: SessionOptions,
    pub submission: SubmissionConfig,
    pub backend: BackendConfig,
    /// File the config was read from (`None` for embedded defaults)
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl TallyConfig {
    /// Load from the default override location, then apply the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from `path` when given (it must exist), otherwise the default
    /// override location, otherwise the embedded defaults
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                read_config(path)?
            }
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => read_config(&path)?,
                None => parse_config(DEFAULT_CONFIG)?,
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Embedded defaults only
    pub fn embedded() -> Result<Self> {
        parse_config(DEFAULT_CONFIG)
    }

    /// Apply environment-style overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup(ENV_BACKEND).filter(|v| !v.trim().is_empty()) {
            self.backend.kind = kind.parse()?;
        }
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.trim().is_empty()) {
            debug!("Backend URL from {}", ENV_BACKEND_URL);
            self.backend.url = Some(url);
        }
        Ok(())
    }

    /// Render as TOML (for `tally config show`)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("Failed to render config: {}", e)))
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("import.toml"))
}

fn read_config(path: &Path) -> Result<TallyConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {}", path.display(), e)))?;
    let mut config = parse_config(&content)?;
    config.source = Some(path.to_path_buf());
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    matching: Option<RawMatching>,
    session: Option<RawSession>,
    submission: Option<RawSubmission>,
    backend: Option<RawBackend>,
}

#[derive(Debug, Deserialize)]
struct RawMatching {
    threshold: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    include_type_step: Option<bool>,
    delegate_mapping: Option<bool>,
    reconcile_matched: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawSubmission {
    delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawBackend {
    kind: Option<String>,
    url: Option<String>,
    timeout_secs: Option<u64>,
    token_env: Option<String>,
}

/// Parse config from TOML content; missing keys keep their defaults
fn parse_config(content: &str) -> Result<TallyConfig> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

    let mut config = TallyConfig::default();

    if let Some(matching) = raw.matching {
        if let Some(threshold) = matching.threshold {
            if threshold > MAX_SCORE {
                return Err(Error::Config(format!(
                    "matching.threshold must be between 0 and {}, got {}",
                    MAX_SCORE, threshold
                )));
            }
            config.matching.threshold = threshold;
        }
    }

    if let Some(session) = raw.session {
        if let Some(v) = session.include_type_step {
            config.session.include_type_step = v;
        }
        if let Some(v) = session.delegate_mapping {
            config.session.delegate_mapping = v;
        }
        if let Some(v) = session.reconcile_matched {
            config.session.reconcile_matched = v;
        }
    }

    if let Some(submission) = raw.submission {
        if let Some(delay) = submission.delay_ms {
            config.submission.delay_ms = delay;
        }
    }

    if let Some(backend) = raw.backend {
        if let Some(kind) = backend.kind {
            config.backend.kind = kind.parse()?;
        }
        config.backend.url = backend.url.filter(|u| !u.trim().is_empty());
        if let Some(timeout) = backend.timeout_secs {
            config.backend.timeout_secs = timeout;
        }
        if let Some(token_env) = backend.token_env {
            config.backend.token_env = token_env;
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_default_config() {
        let config = parse_config(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.matching.threshold, 50);
        assert!(config.session.reconcile_matched);
        assert!(!config.session.include_type_step);
        assert_eq!(config.backend.kind, BackendKind::Remote);
        assert!(config.backend.url.is_none());
        assert_eq!(config.backend.token_env, DEFAULT_TOKEN_ENV);
        assert_eq!(config.submission.delay(), None);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = parse_config("[matching]\nthreshold = 70\n").unwrap();
        assert_eq!(config.matching.threshold, 70);
        assert!(config.session.reconcile_matched);
        assert_eq!(config.backend.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            parse_config("[matching]\nthreshold = 101\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            parse_config("[backend]\nkind = \"ftp\"\n"),
            Err(Error::Config(_))
        ));
        assert!(matches!(parse_config("not toml ["), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("import.toml");
        fs::write(
            &path,
            "[backend]\nkind = \"remote\"\nurl = \"http://localhost:3000/api\"\n[submission]\ndelay_ms = 250\n",
        )
        .unwrap();

        let config = read_config(&path).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Remote);
        assert_eq!(config.backend.url.as_deref(), Some("http://localhost:3000/api"));
        assert_eq!(config.submission.delay(), Some(std::time::Duration::from_millis(250)));
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            TallyConfig::load_from(Some(&missing)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [(ENV_BACKEND_URL, "http://backend:8080")].into();
        let mut config = TallyConfig::embedded().unwrap();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.backend.kind, BackendKind::Remote);
        assert_eq!(config.backend.url.as_deref(), Some("http://backend:8080"));

        let env: HashMap<&str, &str> =
            [(ENV_BACKEND_URL, "http://backend:8080"), (ENV_BACKEND, "memory")].into();
        let mut config = TallyConfig::embedded().unwrap();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.backend.kind, BackendKind::Memory);
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = TallyConfig::embedded().unwrap();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("threshold = 50"));
        assert_eq!(parse_config(&rendered).unwrap().matching, config.matching);
    }
}
