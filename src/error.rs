/// Error types for the fleet chat agent.
/// One enum per domain, nested where a domain wraps another.
use thiserror::Error;

/// Failures of the credential store and user directory.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures raised by a chat transport implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Version lookup failed: {0}")]
    Version(String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Transport link is closed")]
    LinkClosed,
}

/// Failures of the per-user session lifecycle.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A session is already active for user {0}")]
    AlreadyActive(String),

    #[error("Session for user {0} is no longer active")]
    NotActive(String),

    #[error("Pairing abandoned: no browser is listening for codes")]
    PairingAbandoned,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures of the browser pairing relay.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("A pairing channel is already open for user {0}")]
    AlreadyActive(String),
}

/// Failures of the scripted conversation engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Timed out waiting for step {step} ({expected})")]
    StepTimeout { step: usize, expected: String },

    #[error("Reply did not match step {step}: expected {expected}")]
    StepMismatch { step: usize, expected: String },

    #[error("Identity fallback has no deterministic outcome in reduced flow")]
    FallbackUnavailable,

    #[error("Session closed before the conversation completed")]
    SessionClosed,

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}
