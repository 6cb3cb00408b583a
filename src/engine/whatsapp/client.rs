// WhatsApp Gateway — Connection Client Contract
// ConnectionClient / ClientFactory traits, ClientEvent, disconnect classification
//
// The gateway never speaks the WhatsApp Web protocol itself. A backend
// (Evolution API, or a fake in tests) implements these traits; the lifecycle
// manager only consumes the event stream and the send/identity/close calls.

use super::credentials::CredentialBlob;
use crate::atoms::error::EngineResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

// ── Events ─────────────────────────────────────────────────────────────

/// Connection-state update emitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    /// A new pairing payload (data-URL image or raw QR text).
    Qr(String),
    /// The connection is open and authenticated.
    Opened,
    /// The connection closed. `status_code` is absent when the client gave no reason.
    Closed { status_code: Option<u16> },
}

/// Everything a client can emit, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connection(ConnectionUpdate),
    CredentialsUpdated(CredentialBlob),
}

impl From<ConnectionUpdate> for ClientEvent {
    fn from(update: ConnectionUpdate) -> Self {
        ClientEvent::Connection(update)
    }
}

pub type EventSender = mpsc::UnboundedSender<ClientEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

// ── Disconnect classification ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// Authorization was revoked; credentials are useless.
    LoggedOut,
    /// Network-level drop; reconnecting with the same credentials may work.
    Transient,
}

/// Anything not in `logout_codes` (including a missing code) is transient.
pub fn classify_disconnect(status_code: Option<u16>, logout_codes: &[u16]) -> DisconnectKind {
    match status_code {
        Some(code) if logout_codes.contains(&code) => DisconnectKind::LoggedOut,
        _ => DisconnectKind::Transient,
    }
}

// ── Client traits ──────────────────────────────────────────────────────

/// Handle to one live WhatsApp Web connection.
#[async_trait]
pub trait ConnectionClient: Send + Sync {
    /// Own JID once authenticated, `None` before pairing completes.
    fn identity(&self) -> Option<String>;

    /// Send a text message to a routable address. Returns the message id.
    async fn send_text(&self, address: &str, body: &str) -> EngineResult<String>;

    /// Release the connection. Credentials are left untouched.
    async fn close(&self);

    /// Unlink the device upstream, then release the connection.
    async fn logout(&self) {
        self.close().await;
    }
}

/// A freshly constructed client plus its event stream.
pub struct ClientConnection {
    pub client: Arc<dyn ConnectionClient>,
    pub events: EventReceiver,
}

/// Builds clients bound to stored credentials.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(
        &self,
        id: &str,
        credentials: Option<CredentialBlob>,
    ) -> EngineResult<ClientConnection>;
}
