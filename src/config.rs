//! Configuration file parser for ~/.config/feedpager/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted, though we log a warning since they are
//! usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::loader::DEFAULT_PAGE_SIZE;
use crate::story::IntelligenceLevel;
use crate::transport::TransportOptions;

/// Environment variable that overrides `session_cookie`.
pub const SESSION_ENV: &str = "NEWSBLUR_SESSION";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level configuration.
///
/// Every field has a default so any subset of keys can be given. Debug
/// output masks `session_cookie`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reader server root, e.g. `https://newsblur.com`.
    pub base_url: String,

    /// Stories per server page; a shorter page ends pagination.
    pub page_size: usize,

    /// Intelligence filter applied when a stream is opened (-1, 0 or 1).
    pub default_intelligence: IntelligenceLevel,

    pub request_timeout_secs: u64,

    /// Retries for rate-limited or 5xx responses.
    pub max_retries: u32,

    /// Offline cache database. Defaults to `cache.db` in the config directory.
    pub cache_path: Option<PathBuf>,

    /// `newsblur_sessionid` cookie value. `NEWSBLUR_SESSION` takes precedence.
    pub session_cookie: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://newsblur.com".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            default_intelligence: IntelligenceLevel::default(),
            request_timeout_secs: 30,
            max_retries: 3,
            cache_path: None,
            session_cookie: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .field("default_intelligence", &self.default_intelligence)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("cache_path", &self.cache_path)
            .field(
                "session_cookie",
                &self.session_cookie.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Upper bound for `max_retries`.
    const MAX_RETRIES: u32 = 10;

    const KNOWN_KEYS: [&'static str; 7] = [
        "base_url",
        "page_size",
        "default_intelligence",
        "request_timeout_secs",
        "max_retries",
        "cache_path",
        "session_cookie",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML or an out-of-range value → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never pulled into memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let mut config: Config = toml::from_str(content)?;
        if config.page_size == 0 {
            tracing::warn!("page_size = 0 is not usable, using default");
            config.page_size = DEFAULT_PAGE_SIZE;
        }
        if config.max_retries > Self::MAX_RETRIES {
            tracing::warn!(
                max_retries = config.max_retries,
                limit = Self::MAX_RETRIES,
                "max_retries too large, clamping"
            );
            config.max_retries = Self::MAX_RETRIES;
        }

        tracing::info!(
            path = %path.display(),
            base_url = %config.base_url,
            page_size = config.page_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Session cookie to send, preferring `env_value` (the contents of
    /// [`SESSION_ENV`]) over the file. Blank values count as unset.
    pub fn session(&self, env_value: Option<String>) -> Option<SecretString> {
        env_value
            .filter(|v| !v.trim().is_empty())
            .or_else(|| {
                self.session_cookie
                    .clone()
                    .filter(|v| !v.trim().is_empty())
            })
            .map(SecretString::from)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            ..TransportOptions::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
