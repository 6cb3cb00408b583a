// WhatsApp Gateway — Session Lifecycle
// SessionManager: initialize, event pump, connection/credential handlers,
// reconnect scheduling, logout, invalidate, shutdown
//
// State machine per session id:
//
//   (absent) ──initialize──▶ Connecting ◀──qr──▶ AwaitingQr
//                               │    ▲               │
//                            opened  └─reconnect─┐ opened
//                               ▼                │   ▼
//                            Connected ──closed(transient)──▶ Disconnected
//
//   closed(logged out) from any state ──▶ (absent), credentials deleted

use super::client::{
    classify_disconnect, ClientConnection, ClientEvent, ClientFactory, ConnectionClient,
    ConnectionUpdate, DisconnectKind, EventReceiver,
};
use super::config::GatewayConfig;
use super::credentials::{CredentialBlob, CredentialStore};
use super::registry::{SessionRecord, SessionRegistry};
use crate::atoms::constants::LOGGED_OUT_STATUS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::SessionState;
use crate::engine::http::ReconnectPolicy;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ── Options ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub reconnect: ReconnectPolicy,
    /// Close status codes treated as an explicit logout.
    pub logout_status_codes: Vec<u16>,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            logout_status_codes: vec![LOGGED_OUT_STATUS],
        }
    }
}

impl From<&GatewayConfig> for LifecycleOptions {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            reconnect: config.reconnect_policy(),
            logout_status_codes: config.logout_status_codes.clone(),
        }
    }
}

// ── Manager ────────────────────────────────────────────────────────────

/// Owns the session registry and drives every state transition.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    registry: SessionRegistry,
    store: Arc<dyn CredentialStore>,
    factory: Arc<dyn ClientFactory>,
    options: LifecycleOptions,
    /// Source of client generations. Global so a removed-then-recreated
    /// record can never reuse a generation an in-flight task still holds.
    next_generation: AtomicU64,
}

/// Whether the event pump keeps consuming after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// What `initialize` claimed under the registry lock.
struct Claim {
    generation: u64,
    created: bool,
    stale: Option<Arc<dyn ConnectionClient>>,
}

/// Clears `initializing` on every exit path of `initialize`.
struct InitGuard<'a> {
    registry: &'a SessionRegistry,
    id: &'a str,
    generation: u64,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.registry.update(self.id, |r| {
            if r.generation == generation {
                r.initializing = false;
            }
        });
    }
}

impl SessionManager {
    pub fn new(
        registry: SessionRegistry,
        store: Arc<dyn CredentialStore>,
        factory: Arc<dyn ClientFactory>,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry,
                store,
                factory,
                options,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    // ── initialize ─────────────────────────────────────────────────────

    /// Ensure a client exists for `id`.
    ///
    /// Returns immediately when another initialization for `id` is in flight
    /// or a live client is already installed. Otherwise loads the stored
    /// credentials, constructs a client and starts consuming its events.
    /// Does not wait for pairing.
    pub async fn initialize(&self, id: &str) -> EngineResult<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(EngineError::InvalidRequest("session id must not be empty".into()));
        }

        let Some(claim) = self.claim(id) else {
            return Ok(());
        };
        let _guard = InitGuard {
            registry: &self.inner.registry,
            id,
            generation: claim.generation,
        };

        if let Some(stale) = claim.stale.as_ref() {
            stale.close().await;
        }

        info!("[whatsapp] Initializing session {} (gen {})", id, claim.generation);

        let credentials = match self.inner.store.load(id) {
            Ok(credentials) => credentials,
            Err(e) => return Err(self.abort_init(id, &claim, format!("load credentials: {e}"))),
        };
        if credentials.is_none() {
            debug!("[whatsapp] No stored credentials for {} — pairing required", id);
        }

        let ClientConnection { client, events } = match self.inner.factory.create(id, credentials).await {
            Ok(connection) => connection,
            Err(e) => return Err(self.abort_init(id, &claim, e.to_string())),
        };

        let installed = self
            .inner
            .registry
            .update(id, |r| {
                if r.generation != claim.generation {
                    return false;
                }
                r.client = Some(client.clone());
                true
            })
            .unwrap_or(false);

        if !installed {
            info!("[whatsapp] Session {} was torn down while connecting — discarding client", id);
            client.close().await;
            return Ok(());
        }

        tokio::spawn(self.clone().pump_events(id.to_string(), claim.generation, events));
        Ok(())
    }

    fn claim(&self, id: &str) -> Option<Claim> {
        let mut sessions = self.inner.registry.lock();
        let created = !sessions.contains_key(id);
        let record = sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionRecord::new(id));

        if record.initializing {
            debug!("[whatsapp] Session {} already initializing — skipping", id);
            return None;
        }
        if record.is_live() {
            debug!("[whatsapp] Session {} already {} — skipping", id, record.state);
            return None;
        }

        record.initializing = true;
        record.cancel_reconnect();
        record.state = SessionState::Connecting;
        record.pending_qr = None;
        record.generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        Some(Claim {
            generation: record.generation,
            created,
            stale: record.client.take(),
        })
    }

    /// Undo a failed initialization and build the error to surface.
    fn abort_init(&self, id: &str, claim: &Claim, message: String) -> EngineError {
        error!("[whatsapp] Session {} failed to initialize: {}", id, message);
        if claim.created {
            if let Some(record) = self.inner.registry.remove_if(id, |r| r.generation == claim.generation) {
                record.teardown();
            }
        } else {
            self.inner.registry.update(id, |r| {
                if r.generation == claim.generation {
                    r.mark_disconnected();
                }
            });
        }
        EngineError::session_init(id, message)
    }

    // ── Event pump ─────────────────────────────────────────────────────

    /// Consume one client's events in emission order until the stream ends,
    /// the connection closes, or a newer client supersedes this one.
    async fn pump_events(self, id: String, generation: u64, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            if self.inner.registry.generation(&id) != Some(generation) {
                debug!("[whatsapp] Dropping event for superseded session {} (gen {})", id, generation);
                return;
            }

            match event {
                ClientEvent::CredentialsUpdated(blob) => {
                    self.handle_credentials_update(&id, generation, &blob);
                }
                ClientEvent::Connection(update) => {
                    match self.handle_connection_update(&id, generation, update).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) | Err(EngineError::LogoutTerminal(_)) => return,
                        Err(e) => warn!("[whatsapp] Event handling for {} failed: {}", id, e),
                    }
                }
            }
        }
        debug!("[whatsapp] Event stream for {} (gen {}) ended", id, generation);
    }

    // ── Connection-state handler ───────────────────────────────────────

    /// Apply one connection-state update from the client of `generation`.
    /// Updates from any other generation are ignored.
    ///
    /// Returns `Flow::Stop` once this client is detached, and `LogoutTerminal`
    /// after a logged-out close has destroyed the session.
    pub(crate) async fn handle_connection_update(
        &self,
        id: &str,
        generation: u64,
        update: ConnectionUpdate,
    ) -> EngineResult<Flow> {
        match update {
            ConnectionUpdate::Qr(payload) => {
                self.apply_qr(id, generation, payload);
                Ok(Flow::Continue)
            }
            ConnectionUpdate::Opened => {
                if self.apply_opened(id, generation) {
                    return Ok(Flow::Continue);
                }
                // An open we cannot attribute to an account is as good as a drop.
                self.apply_transient_close(id, generation, None).await;
                Ok(Flow::Stop)
            }
            ConnectionUpdate::Closed { status_code } => {
                match classify_disconnect(status_code, &self.inner.options.logout_status_codes) {
                    DisconnectKind::LoggedOut => {
                        self.apply_logged_out(id, generation, status_code).await.map(|()| Flow::Stop)
                    }
                    DisconnectKind::Transient => {
                        self.apply_transient_close(id, generation, status_code).await;
                        Ok(Flow::Stop)
                    }
                }
            }
        }
    }

    fn apply_qr(&self, id: &str, generation: u64, payload: String) {
        let applied = self
            .inner
            .registry
            .update(id, |r| {
                r.generation == generation && r.apply_qr(payload)
            })
            .unwrap_or(false);
        if applied {
            info!("[whatsapp] QR code received for {} — waiting for scan", id);
        } else {
            debug!("[whatsapp] QR for {} (gen {}) ignored", id, generation);
        }
    }

    /// Returns `false` when the client reported open without an identity.
    fn apply_opened(&self, id: &str, generation: u64) -> bool {
        let mut sessions = self.inner.registry.lock();
        let Some(record) = sessions.get_mut(id).filter(|r| r.generation == generation) else {
            return true;
        };
        match record.client.as_ref().and_then(|c| c.identity()) {
            Some(identity) => {
                record.mark_connected();
                info!("[whatsapp] Session {} connected as {}", id, identity);
                true
            }
            None => {
                warn!("[whatsapp] Session {} reported open without an identity — reconnecting", id);
                false
            }
        }
    }

    async fn apply_logged_out(&self, id: &str, generation: u64, status_code: Option<u16>) -> EngineResult<()> {
        let Some(record) = self.inner.registry.remove_if(id, |r| r.generation == generation) else {
            return Ok(());
        };
        warn!(
            "[whatsapp] Session {} logged out (status {:?}) — removing credentials, re-pairing required",
            id, status_code
        );
        if let Some(client) = record.teardown() {
            client.close().await;
        }
        if let Err(e) = self.inner.store.delete(id) {
            error!("[whatsapp] Failed to delete credentials for {}: {}", id, e);
        }
        Err(EngineError::LogoutTerminal(id.to_string()))
    }

    async fn apply_transient_close(&self, id: &str, generation: u64, status_code: Option<u16>) {
        let mut client = None;
        let detached = self
            .inner
            .registry
            .update(id, |r| {
                if r.generation != generation {
                    return false;
                }
                client = r.mark_disconnected();
                true
            })
            .unwrap_or(false);
        if !detached {
            return;
        }

        warn!("[whatsapp] Session {} closed (status {:?}) — will reconnect", id, status_code);
        self.schedule_reconnect(id);
        if let Some(client) = client {
            client.close().await;
        }
    }

    // ── Credential-change handler ──────────────────────────────────────

    /// Persist the latest credentials, overwriting what was stored.
    ///
    /// The write happens under the registry lock, and only while the record
    /// still belongs to `generation`, so a concurrent teardown cannot be
    /// followed by a stale write.
    pub(crate) fn handle_credentials_update(&self, id: &str, generation: u64, blob: &CredentialBlob) {
        let saved = self
            .inner
            .registry
            .update(id, |r| (r.generation == generation).then(|| self.inner.store.save(id, blob)))
            .flatten();
        match saved {
            Some(Ok(())) => debug!("[whatsapp] Credentials persisted for {}", id),
            Some(Err(e)) => error!("[whatsapp] Failed to persist credentials for {}: {}", id, e),
            None => debug!("[whatsapp] Credentials for superseded session {} (gen {}) dropped", id, generation),
        }
    }

    // ── Reconnection ───────────────────────────────────────────────────

    /// Schedule `initialize(id)` after the backoff delay. At most one pending
    /// reconnection per session; the task handle lives on the record so a
    /// teardown can abort it.
    fn schedule_reconnect(&self, id: &str) {
        let mut sessions = self.inner.registry.lock();
        let Some(record) = sessions.get_mut(id) else {
            return;
        };
        if record.reconnect.is_some() {
            return;
        }

        let attempt = record.reconnect_attempts;
        record.reconnect_attempts = attempt.saturating_add(1);
        let delay = self.inner.options.reconnect.delay(attempt);
        info!(
            "[whatsapp] Reconnecting {} in {}ms (attempt {})",
            id,
            delay.as_millis(),
            attempt + 1
        );

        let manager = self.clone();
        let key = id.to_string();
        record.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.run_reconnect(key).await;
        }));
    }

    async fn run_reconnect(self, id: String) {
        // Take our own handle first so `initialize` does not abort this task.
        let due = self
            .inner
            .registry
            .update(&id, |r| {
                r.reconnect = None;
                r.state == SessionState::Disconnected
            })
            .unwrap_or(false);
        if !due {
            debug!("[whatsapp] Reconnect for {} no longer needed", id);
            return;
        }

        if let Err(e) = self.initialize(&id).await {
            warn!("[whatsapp] Reconnect of {} failed: {}", id, e);
            self.schedule_reconnect(&id);
        }
    }

    // ── Teardown ───────────────────────────────────────────────────────

    /// Unlink `id` upstream, forget it and delete its credentials.
    pub async fn logout(&self, id: &str) -> EngineResult<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(EngineError::InvalidRequest("session id must not be empty".into()));
        }
        if let Some(record) = self.inner.registry.remove_if(id, |_| true) {
            info!("[whatsapp] Logging out session {}", id);
            if let Some(client) = record.teardown() {
                client.logout().await;
            }
        }
        self.inner.store.delete(id)
    }

    /// Destroy a session whose client proved unusable. Only the record of
    /// `generation` is touched.
    pub(crate) async fn invalidate(&self, id: &str, generation: u64) {
        let Some(record) = self.inner.registry.remove_if(id, |r| r.generation == generation) else {
            return;
        };
        warn!("[whatsapp] Invalidating session {} — credentials removed, re-pairing required", id);
        if let Some(client) = record.teardown() {
            client.close().await;
        }
        if let Err(e) = self.inner.store.delete(id) {
            error!("[whatsapp] Failed to delete credentials for {}: {}", id, e);
        }
    }

    /// Close every client and cancel every pending reconnection.
    /// Credentials stay on disk so the next start resumes without pairing.
    pub async fn shutdown(&self) {
        let records = self.inner.registry.drain();
        info!("[whatsapp] Shutting down {} session(s)", records.len());
        for record in records {
            let id = record.id.clone();
            if let Some(client) = record.teardown() {
                client.close().await;
                debug!("[whatsapp] Closed session {}", id);
            }
        }
    }
}
