// WhatsApp Gateway — Send Coordinator
// normalize_destination, SendCoordinator::send

use super::lifecycle::SessionManager;
use super::registry::SessionRegistry;
use crate::atoms::constants::{DEFAULT_JID_SUFFIX, PAIRING_REQUIRED_MESSAGE};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::SendOutcome;
use log::{info, warn};

/// Strip every non-digit and append `@{suffix}`.
pub fn normalize_destination(raw: &str, suffix: &str) -> EngineResult<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(EngineError::InvalidDestination(raw.to_string()));
    }
    Ok(format!("{digits}@{suffix}"))
}

/// Dispatches outbound text through a connected session.
#[derive(Clone)]
pub struct SendCoordinator {
    registry: SessionRegistry,
    manager: SessionManager,
    jid_suffix: String,
    retries: u32,
}

impl SendCoordinator {
    pub fn new(manager: SessionManager) -> Self {
        Self {
            registry: manager.registry().clone(),
            manager,
            jid_suffix: DEFAULT_JID_SUFFIX.into(),
            retries: 0,
        }
    }

    pub fn with_jid_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.jid_suffix = suffix.into();
        self
    }

    /// Extra dispatch attempts before a failure invalidates the session.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Send `body` from session `source_id` to `destination`.
    ///
    /// An unconnected session is initialized in the background and the caller
    /// gets `PairingRequired` with the current QR payload, if any, even when
    /// that initialization fails. A failed dispatch destroys the session and
    /// its credentials.
    pub async fn send(&self, source_id: &str, destination: &str, body: &str) -> EngineResult<SendOutcome> {
        let source_id = source_id.trim();
        if source_id.is_empty() {
            return Err(EngineError::InvalidRequest("sourceId must not be empty".into()));
        }
        if body.trim().is_empty() {
            return Err(EngineError::InvalidRequest("message must not be empty".into()));
        }

        let Some((generation, client)) = self.registry.connected_client(source_id) else {
            info!("[whatsapp] Session {} not connected — pairing required", source_id);
            if let Err(e) = self.manager.initialize(source_id).await {
                warn!("[whatsapp] Background start of {} failed: {}", source_id, e);
            }
            return Ok(self.pairing_required(source_id));
        };

        let address = normalize_destination(destination, &self.jid_suffix)?;

        let mut last_error = None;
        for attempt in 0..=self.retries {
            match client.send_text(&address, body).await {
                Ok(message_id) => {
                    info!("[whatsapp] Message sent from {} to {} ({})", source_id, address, message_id);
                    return Ok(SendOutcome::Sent { message_id });
                }
                Err(e) => {
                    warn!(
                        "[whatsapp] Send from {} failed (attempt {}/{}): {}",
                        source_id,
                        attempt + 1,
                        self.retries + 1,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            let dispatch = EngineError::send_dispatch(source_id, e.to_string());
            warn!("[whatsapp] {}", dispatch);
        }
        self.manager.invalidate(source_id, generation).await;
        Ok(self.pairing_required(source_id))
    }

    fn pairing_required(&self, id: &str) -> SendOutcome {
        SendOutcome::PairingRequired {
            qr: self.registry.pending_qr(id),
            message: PAIRING_REQUIRED_MESSAGE.into(),
        }
    }
}
