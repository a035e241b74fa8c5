//! Runtime configuration.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables.  Environment always wins so deployments can
//! override a checked-in config file without editing it.
//!
//! Recognised environment variables:
//! - `GEMINI_API_KEY` / `KOPI_API_KEY` — reasoning provider key
//! - `KOPI_MODEL`, `KOPI_BASE_URL`, `KOPI_PROVIDER`
//! - `KOPI_WINDOW_SIZE`, `KOPI_TURN_TIMEOUT_SECS`
//! - `KOPI_OUTLETS_DB`, `KOPI_PRODUCTS_JSON`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AgentError, Result};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Reasoning provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningSettings {
    /// Provider name: `gemini` or `openai`.
    pub provider: String,
    /// API key.  Usually supplied via environment, not the file.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// API base URL.  Empty means the provider default.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            api_key: String::new(),
            model: "gemini-2.0-flash".into(),
            base_url: String::new(),
            request_timeout_secs: 20,
        }
    }
}

/// Turn controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnSettings {
    /// How many of the most recent conversation entries the planner sees.
    pub window_size: usize,
    /// Hard deadline for an entire turn, in seconds.
    pub turn_timeout_secs: u64,
    /// How long a turn waits for the session lock before giving up, in
    /// seconds.
    pub session_lock_timeout_secs: u64,
    /// Deadline for a single tool invocation, in seconds.
    pub tool_timeout_secs: u64,
    /// Backoff before the single reasoning retry, in milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            window_size: 10,
            turn_timeout_secs: 30,
            session_lock_timeout_secs: 5,
            tool_timeout_secs: 10,
            retry_backoff_ms: 500,
        }
    }
}

/// Data file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// SQLite database holding outlet records.
    pub outlets_db: PathBuf,
    /// JSON file holding the product catalogue.
    pub products_json: PathBuf,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            outlets_db: PathBuf::from("data/outlets.db"),
            products_json: PathBuf::from("data/products.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KopiConfig {
    pub reasoning: ReasoningSettings,
    pub turn: TurnSettings,
    pub data: DataSettings,
}

impl KopiConfig {
    /// Parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        toml::from_str(&text).map_err(|e| AgentError::ConfigError {
            reason: format!("invalid config {}: {e}", path.display()),
        })
    }

    /// Load configuration: defaults, optional file, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay recognised environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.reasoning.api_key = key;
        }
        if let Ok(key) = std::env::var("KOPI_API_KEY") {
            self.reasoning.api_key = key;
        }
        if let Ok(v) = std::env::var("KOPI_PROVIDER") {
            self.reasoning.provider = v;
        }
        if let Ok(v) = std::env::var("KOPI_MODEL") {
            self.reasoning.model = v;
        }
        if let Ok(v) = std::env::var("KOPI_BASE_URL") {
            self.reasoning.base_url = v;
        }
        if let Ok(v) = std::env::var("KOPI_WINDOW_SIZE")
            && let Ok(n) = v.parse()
        {
            self.turn.window_size = n;
        }
        if let Ok(v) = std::env::var("KOPI_TURN_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.turn.turn_timeout_secs = n;
        }
        if let Ok(v) = std::env::var("KOPI_OUTLETS_DB") {
            self.data.outlets_db = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("KOPI_PRODUCTS_JSON") {
            self.data.products_json = PathBuf::from(v);
        }
        debug!(provider = %self.reasoning.provider, model = %self.reasoning.model, "config resolved");
    }

    fn validate(&self) -> Result<()> {
        if self.turn.window_size == 0 {
            return Err(AgentError::ConfigError {
                reason: "turn.window_size must be at least 1".into(),
            });
        }
        if self.turn.turn_timeout_secs == 0 {
            return Err(AgentError::ConfigError {
                reason: "turn.turn_timeout_secs must be at least 1".into(),
            });
        }
        match self.reasoning.provider.as_str() {
            "gemini" | "openai" => Ok(()),
            other => Err(AgentError::ConfigError {
                reason: format!("unknown reasoning provider: {other}"),
            }),
        }
    }

    /// The whole-turn deadline.
    pub fn turn_budget(&self) -> Duration {
        Duration::from_secs(self.turn.turn_timeout_secs)
    }

    /// The session lock wait budget.
    pub fn lock_budget(&self) -> Duration {
        Duration::from_secs(self.turn.session_lock_timeout_secs)
    }

    /// The per-tool-invocation deadline.
    pub fn tool_budget(&self) -> Duration {
        Duration::from_secs(self.turn.tool_timeout_secs)
    }

    /// Backoff before the single reasoning retry.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.turn.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = KopiConfig::default();
        assert_eq!(config.turn.window_size, 10);
        assert_eq!(config.turn.turn_timeout_secs, 30);
        assert_eq!(config.reasoning.provider, "gemini");
    }

    #[test]
    fn parses_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kopi.toml");
        std::fs::write(
            &path,
            "[turn]\nwindow_size = 4\n\n[reasoning]\nmodel = \"gemini-1.5-pro\"\n",
        )
        .unwrap();

        let config = KopiConfig::from_file(&path).unwrap();
        assert_eq!(config.turn.window_size, 4);
        assert_eq!(config.reasoning.model, "gemini-1.5-pro");
        // Untouched sections keep defaults.
        assert_eq!(config.turn.turn_timeout_secs, 30);
    }

    #[test]
    fn rejects_zero_window() {
        let mut config = KopiConfig::default();
        config.turn.window_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut config = KopiConfig::default();
        config.reasoning.provider = "psychic".into();
        assert!(config.validate().is_err());
    }
}
