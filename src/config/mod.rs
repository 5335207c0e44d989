//! Configuration management
//!
//! This module handles loading and parsing configuration for the storegate core.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults. Secrets are only
//! ever read from the environment and are validated once at process start; a
//! missing or too-short secret is a fatal startup error, never a per-request
//! condition.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Minimum length for the token signing secret
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Minimum length for the CSRF secret
pub const MIN_CSRF_SECRET_LEN: usize = 16;

/// Error raised for invalid configuration at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required secret is missing from the environment
    #[error("missing required environment variable: {0}")]
    MissingSecret(&'static str),

    /// A secret is present but too short to be safe
    #[error("{name} must be at least {min} characters (got {len})")]
    SecretTooShort {
        name: &'static str,
        min: usize,
        len: usize,
    },

    /// The config file exists but could not be parsed
    #[error("failed to parse config file: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// The config file exists but could not be read
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Rate limit policy applied by the admission middleware
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from a YAML file, falling back to defaults when the
    /// file does not exist. Environment variables override file settings.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("STOREGATE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("STOREGATE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(url) = std::env::var("STOREGATE_REDIS_URL") {
            self.store.redis_url = Some(url);
        }
        if let Ok(max) = std::env::var("STOREGATE_RATE_LIMIT_MAX") {
            if let Ok(max) = max.parse() {
                self.rate_limit.max_requests = max;
            }
        }
        if let Ok(window) = std::env::var("STOREGATE_RATE_LIMIT_WINDOW_MS") {
            if let Ok(window) = window.parse() {
                self.rate_limit.window_ms = window;
            }
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Production posture (secure cookies, strict secrets)
    #[serde(default = "default_production")]
    pub production: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            production: default_production(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_production() -> bool {
    std::env::var("STOREGATE_ENV").map(|v| v == "production").unwrap_or(false)
}

/// Rate limit policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_ms() -> i64 {
    60_000
}

/// Shared store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL (optional; admission falls back to the local
    /// store when absent or unreachable)
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Timeout for individual shared-store operations in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

fn default_op_timeout_ms() -> u64 {
    1_000
}

/// Secrets loaded from the environment
///
/// Held separately from [`Config`] so they never pass through serde or end up
/// in a config file on disk.
#[derive(Clone)]
pub struct Secrets {
    /// Symmetric signing secret for session tokens
    pub jwt_secret: String,
    /// Keying secret for CSRF hashes
    pub csrf_secret: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets").finish_non_exhaustive()
    }
}

impl Secrets {
    /// Load and validate secrets from the environment.
    ///
    /// # Errors
    ///
    /// - `MissingSecret` if `JWT_SECRET` or `CSRF_SECRET` is unset
    /// - `SecretTooShort` if a secret does not meet its minimum length
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret =
            std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingSecret("JWT_SECRET"))?;
        let csrf_secret =
            std::env::var("CSRF_SECRET").map_err(|_| ConfigError::MissingSecret("CSRF_SECRET"))?;

        Self::new(jwt_secret, csrf_secret)
    }

    /// Construct secrets from explicit values, enforcing length floors.
    pub fn new(jwt_secret: String, csrf_secret: String) -> Result<Self, ConfigError> {
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::SecretTooShort {
                name: "JWT_SECRET",
                min: MIN_JWT_SECRET_LEN,
                len: jwt_secret.len(),
            });
        }
        if csrf_secret.len() < MIN_CSRF_SECRET_LEN {
            return Err(ConfigError::SecretTooShort {
                name: "CSRF_SECRET",
                min: MIN_CSRF_SECRET_LEN,
                len: csrf_secret.len(),
            });
        }

        Ok(Self {
            jwt_secret,
            csrf_secret,
        })
    }
}
