//! Common utilities and types shared across featurevote

pub mod auth;
pub mod auth_middleware;
pub mod config;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod tracing_middleware;
pub mod utils;

pub use config::{CacheBackend, Config, StorageBackend};
pub use error::{Error, Result};
pub use metrics::MetricsRegistry;
pub use retry::{retry, Retry, RetryPolicy};
pub use utils::timestamp_now;
