// ── Gateway Atoms: Shared Types ────────────────────────────────────────────
// Plain data types shared by the engine and the HTTP layer. No I/O here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingQr,
    Connected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingQr => "awaiting_qr",
            SessionState::Connected => "connected",
        }
    }

    /// States in which a pairing payload may be pending.
    pub fn accepts_qr(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::AwaitingQr)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub status: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
}

/// Result of a send request that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The client accepted the message.
    Sent { message_id: String },
    /// The session must be paired (or re-paired) before sending.
    PairingRequired { qr: Option<String>, message: String },
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }
}
