//! # featurevote
//!
//! A feature request board where each user may upvote a feature once:
//! - Durable vote records with a per-(user, feature) uniqueness constraint
//! - A disposable, self-healing vote count cache (in-process or Redis)
//! - A coordinator that always writes the store before the cache
//! - JSON HTTP API with JWT authentication
//!
//! ## Architecture
//!
//! ```text
//!            HTTP (axum)
//!                │
//! ┌──────────────▼──────────────┐
//! │  FeatureRegistry / Accounts │
//! └──────────────┬──────────────┘
//!                │ upvote / unvote / read_count
//! ┌──────────────▼──────────────┐
//! │       VoteCoordinator       │
//! └───────┬──────────────┬──────┘
//!   1. write│              │2. delta / repopulate
//! ┌────────▼───────┐ ┌────▼──────────────┐
//! │   VoteStore    │ │    CountCache     │
//! │ (RocksDB txn)  │ │ (memory / Redis)  │
//! │ source of truth│ │ disposable shadow │
//! └────────────────┘ └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the server
//! ```bash
//! featurevote-server serve \
//!   --bind 0.0.0.0:8000 \
//!   --db ./featurevote-data \
//!   --cache memory
//! ```
//!
//! ### Use the CLI
//! ```bash
//! featurevote register alice alice@example.com
//! export FEATUREVOTE_TOKEN=$(featurevote login alice --access-only)
//! featurevote create "Dark mode" --description "Please"
//! featurevote upvote <feature-id>
//! featurevote list
//! ```

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod common;
pub mod coordinator;
pub mod store;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Server, VoteCoordinator};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
