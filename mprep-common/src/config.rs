//! Configuration loading and resolution
//!
//! Every field resolves with the same priority order:
//! 1. Command-line argument (applied by the CLI layer, highest)
//! 2. `MPREP_*` environment variable
//! 3. TOML config file
//! 4. Compiled default
//!
//! A missing config file is not an error: defaults apply and startup
//! continues. A file that exists but does not parse is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Worker count ceiling. The backend serializes row writes per order, so
/// more workers than this only pile up queued batches.
pub const MAX_CONCURRENCY: usize = 16;

/// Pipeline configuration, resolved once before any command runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base URL of the backend, e.g. `http://127.0.0.1:8000`.
    pub backend_url: String,
    /// Bearer token sent with every request when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// AI model id passed through to the cleanup route. Backend default
    /// when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Rows per cleanup batch request.
    pub batch_size: u64,
    /// Cleanup worker count, clamped to `1..=MAX_CONCURRENCY`.
    pub concurrency: usize,
    /// Cleanup request pacing. 0 disables pacing.
    pub requests_per_second: u32,
    /// Minimum top-candidate score for the default-accept path at review
    /// submit. 0.0 accepts any top candidate.
    pub match_confidence_floor: f64,
    /// Where cleanup checkpoints live. Platform data dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
    /// Per-request timeout. Cleanup batches can take a while server-side.
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".to_string(),
            api_token: None,
            model: None,
            batch_size: 10,
            concurrency: 4,
            requests_per_second: 2,
            match_confidence_floor: 0.0,
            checkpoint_dir: None,
            request_timeout_secs: 120,
        }
    }
}

impl PipelineConfig {
    /// Resolve configuration from file plus environment. CLI flags are
    /// overlaid afterwards by the caller.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_toml_str(&text)?
            }
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    let text = std::fs::read_to_string(&path)?;
                    let config = Self::from_toml_str(&text)?;
                    tracing::info!(path = %path.display(), "Loaded configuration file");
                    config
                }
                _ => {
                    tracing::debug!("No configuration file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid config file: {}", e)))
    }

    /// Write the configuration back out as TOML, creating parent
    /// directories as needed.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("cannot serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Overlay `MPREP_*` environment variables. Unparsable numeric values
    /// are logged and skipped rather than failing startup.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_string("MPREP_BACKEND_URL") {
            self.backend_url = v;
        }
        if let Some(v) = env_string("MPREP_API_TOKEN") {
            self.api_token = Some(v);
        }
        if let Some(v) = env_string("MPREP_MODEL") {
            self.model = Some(v);
        }
        if let Some(v) = env_parsed("MPREP_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = env_parsed("MPREP_CONCURRENCY") {
            self.concurrency = v;
        }
        if let Some(v) = env_parsed("MPREP_REQUESTS_PER_SECOND") {
            self.requests_per_second = v;
        }
        if let Some(v) = env_parsed("MPREP_MATCH_CONFIDENCE_FLOOR") {
            self.match_confidence_floor = v;
        }
        if let Some(v) = env_string("MPREP_CHECKPOINT_DIR") {
            self.checkpoint_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env_parsed("MPREP_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v;
        }
    }

    /// Worker count actually used by the cleanup pool.
    pub fn clamped_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    /// Confidence floor held to the valid score range.
    pub fn confidence_floor(&self) -> f64 {
        self.match_confidence_floor.clamp(0.0, 1.0)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Checkpoint directory with the platform default applied.
    pub fn resolved_checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(default_checkpoint_dir)
    }
}

fn env_string(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Default configuration file location for the platform.
pub fn default_config_path() -> Option<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/mprep/config.toml first, then /etc/mprep/config.toml
        if let Some(path) = dirs::config_dir().map(|d| d.join("mprep").join("config.toml")) {
            if path.exists() {
                return Some(path);
            }
        }
        let system = PathBuf::from("/etc/mprep/config.toml");
        if system.exists() {
            return Some(system);
        }
        dirs::config_dir().map(|d| d.join("mprep").join("config.toml"))
    } else {
        dirs::config_dir().map(|d| d.join("mprep").join("config.toml"))
    }
}

/// Default checkpoint directory for the platform.
pub fn default_checkpoint_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mprep"))
        .unwrap_or_else(|| PathBuf::from("./mprep_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.clamped_concurrency(), 4);
        assert_eq!(config.confidence_floor(), 0.0);
        assert!(config.checkpoint_dir.is_none());
    }

    #[test]
    fn concurrency_is_clamped_to_the_allowed_range() {
        let mut config = PipelineConfig::default();
        config.concurrency = 0;
        assert_eq!(config.clamped_concurrency(), 1);
        config.concurrency = 500;
        assert_eq!(config.clamped_concurrency(), MAX_CONCURRENCY);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config =
            PipelineConfig::from_toml_str("backend_url = \"http://box:9000\"\nbatch_size = 25\n")
                .unwrap();
        assert_eq!(config.backend_url, "http://box:9000");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(PipelineConfig::from_toml_str("batch_size = \"lots\"").is_err());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = PipelineConfig::default();
        config.model = Some("claude-sonnet-4-6".to_string());
        config.match_confidence_floor = 0.35;
        config.save_to_path(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let reloaded = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(reloaded, config);
    }
}
