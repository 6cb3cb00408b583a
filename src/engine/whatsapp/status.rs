// WhatsApp Gateway — Status / QR Accessor
// Read-only projection of the session registry.

use super::registry::SessionRegistry;
use crate::atoms::types::{SessionSnapshot, SessionState};

#[derive(Clone)]
pub struct StatusAccessor {
    registry: SessionRegistry,
}

impl StatusAccessor {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Current state, `Disconnected` when the id is unknown.
    /// Ids are trimmed the same way `SessionManager` trims them.
    pub fn status(&self, id: &str) -> SessionState {
        self.registry.state(id.trim()).unwrap_or_default()
    }

    /// Pending pairing payload, if one is waiting to be scanned.
    pub fn qr(&self, id: &str) -> Option<String> {
        self.registry.pending_qr(id.trim())
    }

    pub fn snapshot(&self, id: &str) -> SessionSnapshot {
        let id = id.trim();
        self.registry.snapshot(id).unwrap_or_else(|| SessionSnapshot {
            id: id.to_string(),
            status: SessionState::Disconnected,
            qr: None,
        })
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        self.registry.list()
    }
}
