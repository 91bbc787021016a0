//! Error types for featurevote

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    #[error("Vote already exists for user {user_id} on feature {feature_id}")]
    DuplicateVote { user_id: Uuid, feature_id: Uuid },

    #[error("No vote exists for user {user_id} on feature {feature_id}")]
    VoteNotFound { user_id: Uuid, feature_id: Uuid },

    #[error("RocksDB error: {0}")]
    RocksDb(rocksdb::Error),

    #[error("Stored record corrupted: {0}")]
    Corrupted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // === Cache Errors ===
    #[cfg(feature = "redis-cache")]
    #[error("Redis error: {0}")]
    Redis(redis::RedisError),

    // === Voting Errors (user visible) ===
    #[error("You have already upvoted this feature.")]
    AlreadyVoted,

    #[error("You have not upvoted this feature.")]
    NotVoted,

    // === Registry Errors ===
    #[error("Feature not found: {0}")]
    FeatureNotFound(Uuid),

    #[error("User not found")]
    UserNotFound,

    #[error("No route matches {0}")]
    NotFound(String),

    #[error("A user with that username or email already exists.")]
    UserExists,

    #[error("{0}")]
    Validation(String),

    // === Auth Errors ===
    #[error("No active account found with the given credentials")]
    InvalidCredentials,

    #[error("Authentication credentials were not provided or are invalid: {0}")]
    Unauthorized(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Transient ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    // === Generic ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Unavailable(_))
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            Error::AlreadyVoted
            | Error::NotVoted
            | Error::DuplicateVote { .. }
            | Error::VoteNotFound { .. }
            | Error::UserExists
            | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::FeatureNotFound(_) | Error::UserNotFound | Error::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Error::InvalidCredentials | Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut => Error::Timeout(e.into_string()),
            ErrorKind::Busy | ErrorKind::TryAgain => Error::Unavailable(e.into_string()),
            _ => Error::RocksDb(e),
        }
    }
}

#[cfg(feature = "redis-cache")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            Error::Unavailable(e.to_string())
        } else {
            Error::Redis(e)
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let detail = match &self {
            // Keep storage internals out of client responses
            Error::RocksDb(_) | Error::Corrupted(_) | Error::Serialization(_) | Error::Io(_) => {
                "Internal server error".to_string()
            }
            #[cfg(feature = "redis-cache")]
            Error::Redis(_) => "Internal server error".to_string(),
            Error::FeatureNotFound(_) | Error::UserNotFound | Error::NotFound(_) => {
                "Not found.".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
