// ── Gateway Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the gateway, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, network, session, caller input).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • "Pairing required" is not an error — it is a `SendOutcome` variant.
//   • No variant carries credential material in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Gateway configuration is invalid or unreadable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The connection client for a session could not be constructed.
    #[error("Session init error: {id}: {message}")]
    SessionInit { id: String, message: String },

    /// Caller supplied a malformed request (missing id, empty body…).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Destination normalized to nothing routable.
    #[error("Invalid destination: {0:?}")]
    InvalidDestination(String),

    /// The connection client rejected or failed an outbound send.
    #[error("Send dispatch error: {id}: {message}")]
    SendDispatch { id: String, message: String },

    /// The session was logged out from the phone; credentials are gone.
    #[error("Session {0} logged out — re-pairing required")]
    LogoutTerminal(String),

    /// Failure reported by the connection-client backend.
    #[error("Channel error: {channel}: {message}")]
    Channel { channel: String, message: String },

    /// Catch-all for errors that do not yet have a dedicated variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a session-init error with id and message.
    pub fn session_init(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SessionInit { id: id.into(), message: message.into() }
    }

    /// Create a send-dispatch error with id and message.
    pub fn send_dispatch(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SendDispatch { id: id.into(), message: message.into() }
    }

    /// Create a channel error with name and message.
    pub fn channel(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel { channel: channel.into(), message: message.into() }
    }

    /// True when the error was caused by caller input rather than the gateway.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::InvalidDestination(_))
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All gateway operations return this type.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}
