//! Error types for paddock-realtime

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection timeout: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Missing required field '{field}' for {kind} message")]
    MissingField { kind: String, field: String },

    #[error("Security error: {0}")]
    Security(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Stale message: timestamp {age_ms}ms outside freshness window")]
    StaleMessage { age_ms: i64 },

    #[error("Permission denied for topic: {0}")]
    PermissionDenied(String),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
