//! Error kinds for the runtime (spec §7).
//!
//! Mirrors the teacher's two-tier split (`ProviderError`/`McpError`): one
//! `thiserror` enum per component family, with `#[from]` conversions at the
//! boundaries that actually see the underlying library errors.

use thiserror::Error;

/// Errors from the event bus (spec §4.2, §7).
#[derive(Error, Debug)]
pub enum BusError {
    #[error("message encode failed: {0}")]
    Encode(String),

    #[error("message decode failed: {0}")]
    Decode(String),

    #[error("no responder for subject")]
    NoResponder,

    #[error("RPC call timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors surfaced by node construction, routing, and lifecycle (spec §7).
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown node type: {0}")]
    UnknownType(String),

    #[error("node already registered: {0}")]
    AlreadyRegistered(String),

    #[error("routing key not found: {0}")]
    KeyNotFound(String),

    #[error("adapter not found for ({exchange}, {instrument})")]
    AdapterNotFound {
        exchange: String,
        instrument: String,
    },

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("node shutdown timed out: {0}")]
    ShutdownTimeout(String),
}

/// Errors from the WebSocket stream connection (spec §4.5, §7).
#[derive(Error, Debug)]
pub enum WsError {
    #[error("dial failed: {0}")]
    Dial(String),

    #[error("maximum reconnect attempts exceeded")]
    MaxReconnects,

    #[error("connection closed")]
    Closed,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("subscription already exists: {0}")]
    AlreadySubscribed(String),
}

/// Errors from the exchange REST collaborator (spec §4.6, §6, §7).
#[derive(Error, Debug)]
pub enum RestError {
    #[error("listen key missing (code -1125)")]
    ListenKeyMissing,

    #[error("exchange API error (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credentials not configured")]
    MissingCredentials,
}

/// RPC reply discriminator (spec §7: `{OK, SERIALIZATION_ERROR, INVALID_REQUEST, INTERNAL}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    Ok,
    SerializationError,
    InvalidRequest,
    Internal,
}
