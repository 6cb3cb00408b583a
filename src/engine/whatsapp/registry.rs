// WhatsApp Gateway — Session Registry
// SessionRecord, SessionRegistry (id → record, single shared map)

use super::client::ConnectionClient;
use crate::atoms::types::{SessionSnapshot, SessionState};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

// ── Session Record ─────────────────────────────────────────────────────

/// State for one phone number.
///
/// Mutated only through the registry lock, which is never held across an
/// `.await`.
pub struct SessionRecord {
    pub(crate) id: String,
    pub(crate) state: SessionState,
    pub(crate) client: Option<Arc<dyn ConnectionClient>>,
    pub(crate) pending_qr: Option<String>,
    /// Set while a client is being constructed; blocks a second initialize.
    pub(crate) initializing: bool,
    /// Bumped whenever a new client is installed. Event pumps stamped with an
    /// older generation are superseded and must not touch the record.
    pub(crate) generation: u64,
    pub(crate) reconnect: Option<JoinHandle<()>>,
    pub(crate) reconnect_attempts: u32,
}

impl SessionRecord {
    pub(crate) fn new(id: &str) -> Self {
        SessionRecord {
            id: id.to_string(),
            state: SessionState::Disconnected,
            client: None,
            pending_qr: None,
            initializing: false,
            generation: 0,
            reconnect: None,
            reconnect_attempts: 0,
        }
    }

    /// A client is installed and has not been closed.
    pub(crate) fn is_live(&self) -> bool {
        self.client.is_some() && self.state != SessionState::Disconnected
    }

    /// Store a pairing payload. Refused once the session is connected or
    /// detached, since no scan can complete there.
    pub(crate) fn apply_qr(&mut self, payload: String) -> bool {
        if !self.state.accepts_qr() {
            return false;
        }
        self.pending_qr = Some(payload);
        self.state = SessionState::AwaitingQr;
        true
    }

    pub(crate) fn mark_connected(&mut self) {
        self.state = SessionState::Connected;
        self.pending_qr = None;
        self.reconnect_attempts = 0;
    }

    /// Drop to `Disconnected`, handing back the client so the caller can close it.
    pub(crate) fn mark_disconnected(&mut self) -> Option<Arc<dyn ConnectionClient>> {
        self.state = SessionState::Disconnected;
        self.pending_qr = None;
        self.client.take()
    }

    pub(crate) fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
    }

    /// Final teardown: cancel any scheduled reconnection and hand back the client.
    pub(crate) fn teardown(mut self) -> Option<Arc<dyn ConnectionClient>> {
        self.cancel_reconnect();
        self.pending_qr = None;
        self.client.take()
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            status: self.state,
            qr: self.pending_qr.clone(),
        }
    }
}

// ── Registry ───────────────────────────────────────────────────────────

/// Process-wide session map. Cheap to clone; all clones share one map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionRecord>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.lock()
    }

    /// Run `f` against the record for `id`, if any.
    pub(crate) fn update<R>(&self, id: &str, f: impl FnOnce(&mut SessionRecord) -> R) -> Option<R> {
        self.sessions.lock().get_mut(id).map(f)
    }

    /// Remove the record for `id` if `pred` accepts it.
    pub(crate) fn remove_if(
        &self,
        id: &str,
        pred: impl FnOnce(&SessionRecord) -> bool,
    ) -> Option<SessionRecord> {
        let mut sessions = self.sessions.lock();
        if sessions.get(id).is_some_and(pred) {
            sessions.remove(id)
        } else {
            None
        }
    }

    pub(crate) fn drain(&self) -> Vec<SessionRecord> {
        self.sessions.lock().drain().map(|(_, record)| record).collect()
    }

    pub(crate) fn generation(&self, id: &str) -> Option<u64> {
        self.sessions.lock().get(id).map(|r| r.generation)
    }

    /// Client and generation of a session that is currently `Connected`.
    pub(crate) fn connected_client(&self, id: &str) -> Option<(u64, Arc<dyn ConnectionClient>)> {
        let sessions = self.sessions.lock();
        let record = sessions.get(id)?;
        if record.state != SessionState::Connected {
            return None;
        }
        record.client.clone().map(|client| (record.generation, client))
    }

    // ── Read-only projections ──────────────────────────────────────────

    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.sessions.lock().get(id).map(|r| r.state)
    }

    pub fn pending_qr(&self, id: &str) -> Option<String> {
        self.sessions.lock().get(id).and_then(|r| r.pending_qr.clone())
    }

    pub fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        self.sessions.lock().get(id).map(SessionRecord::snapshot)
    }

    /// All sessions, sorted by id.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<_> = self.sessions.lock().values().map(SessionRecord::snapshot).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
