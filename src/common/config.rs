//! Configuration for featurevote
//!
//! Layers, lowest priority first: built-in defaults, an optional TOML file,
//! then `FEATUREVOTE__`-prefixed environment variables (`__` separates
//! nested keys, e.g. `FEATUREVOTE__CACHE__TTL_SECS=600`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "featurevote.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

/// Durable vote store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// RocksDB directory
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// How long a transaction waits for a row lock before timing out
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Rocksdb
}
fn default_storage_path() -> PathBuf {
    PathBuf::from("./featurevote-data")
}
fn default_lock_timeout() -> u64 {
    1000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
            lock_timeout_ms: default_lock_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// Aggregate cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Staleness bound for cached counts
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Memory
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/1".to_string()
}
fn default_cache_ttl() -> u64 {
    3600
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            redis_url: default_redis_url(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for signing tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,

    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
}

fn default_jwt_secret() -> String {
    "featurevote-default-secret-change-in-production".to_string()
}
fn default_access_ttl() -> u64 {
    15 * 60
}
fn default_refresh_ttl() -> u64 {
    7 * 24 * 3600
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
        }
    }
}

/// Backoff policy for store and cache calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    25
}
fn default_max_delay() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            log_level: default_log_level(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            auth: AuthConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `featurevote.toml` (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load config, reading `path` instead of the default file when given.
    /// An explicit path must exist; the default file is optional.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p.to_path_buf()).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("FEATUREVOTE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            return Err(Error::InvalidConfig("cache.ttl_secs must be > 0".into()));
        }
        if self.auth.access_token_ttl_secs == 0 || self.auth.refresh_token_ttl_secs == 0 {
            return Err(Error::InvalidConfig("token lifetimes must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig("retry.max_attempts must be >= 1".into()));
        }
        if self.auth.jwt_secret.is_empty() {
            return Err(Error::InvalidConfig("auth.jwt_secret is empty".into()));
        }
        if self.cache.backend == CacheBackend::Redis && !cfg!(feature = "redis-cache") {
            return Err(Error::InvalidConfig(
                "cache.backend = \"redis\" requires the redis-cache feature".into(),
            ));
        }
        Ok(())
    }
}
