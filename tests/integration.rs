// Integration tests — session lifecycle, send coordination and the HTTP API,
// driven through a scripted in-memory connection client.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wa_gateway::engine::server::{self, AppState};
use wa_gateway::engine::whatsapp::{
    ClientConnection, ClientEvent, ClientFactory, ConnectionClient, ConnectionUpdate, CredentialBlob,
    CredentialStore, EventSender, FileCredentialStore, LifecycleOptions, SendCoordinator,
    SessionManager, SessionRegistry, StatusAccessor,
};
use wa_gateway::{EngineError, EngineResult, SendOutcome, SessionState};

// ── Fake client ────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeClient {
    identity: Mutex<Option<String>>,
    sent: Mutex<Vec<(String, String)>>,
    /// Number of upcoming sends that fail.
    failing_sends: AtomicU32,
    closed: AtomicBool,
    logged_out: AtomicBool,
}

#[async_trait]
impl ConnectionClient for FakeClient {
    fn identity(&self) -> Option<String> {
        self.identity.lock().clone()
    }

    async fn send_text(&self, address: &str, body: &str) -> EngineResult<String> {
        let failing = self.failing_sends.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_sends.store(failing - 1, Ordering::SeqCst);
            return Err(EngineError::channel("fake", "socket closed"));
        }
        let mut sent = self.sent.lock();
        sent.push((address.to_string(), body.to_string()));
        Ok(format!("MSG{}", sent.len()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn logout(&self) {
        self.logged_out.store(true, Ordering::SeqCst);
        self.close().await;
    }
}

struct Connection {
    client: Arc<FakeClient>,
    events: EventSender,
    credentials: Option<CredentialBlob>,
}

#[derive(Default)]
struct FakeFactory {
    created: AtomicUsize,
    fail_next: AtomicBool,
    delay: Mutex<Option<Duration>>,
    connections: Mutex<HashMap<String, Vec<Connection>>>,
}

impl FakeFactory {
    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn latest(&self, id: &str) -> (Arc<FakeClient>, EventSender) {
        let connections = self.connections.lock();
        let last = connections.get(id).and_then(|c| c.last()).expect("no client created");
        (last.client.clone(), last.events.clone())
    }

    fn connection_count(&self, id: &str) -> usize {
        self.connections.lock().get(id).map_or(0, Vec::len)
    }

    fn credentials_of_latest(&self, id: &str) -> Option<CredentialBlob> {
        self.connections.lock().get(id).and_then(|c| c.last()).and_then(|c| c.credentials.clone())
    }

    fn emit(&self, id: &str, event: ClientEvent) {
        let (_, events) = self.latest(id);
        events.send(event).expect("event stream closed");
    }

    fn qr(&self, id: &str, payload: &str) {
        self.emit(id, ConnectionUpdate::Qr(payload.into()).into());
    }

    fn open(&self, id: &str) {
        let (client, _) = self.latest(id);
        *client.identity.lock() = Some(format!("{id}@s.whatsapp.net"));
        self.emit(id, ConnectionUpdate::Opened.into());
    }

    fn close(&self, id: &str, status_code: Option<u16>) {
        self.emit(id, ConnectionUpdate::Closed { status_code }.into());
    }

    fn creds(&self, id: &str, value: Value) {
        self.emit(id, ClientEvent::CredentialsUpdated(CredentialBlob::new(value)));
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn create(&self, id: &str, credentials: Option<CredentialBlob>) -> EngineResult<ClientConnection> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EngineError::channel("fake", "construction failed"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(FakeClient::default());
        self.connections.lock().entry(id.to_string()).or_default().push(Connection {
            client: client.clone(),
            events: tx,
            credentials,
        });
        Ok(ClientConnection { client, events: rx })
    }
}

// ── Harness ────────────────────────────────────────────────────────────

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<FileCredentialStore>,
    factory: Arc<FakeFactory>,
    manager: SessionManager,
    sender: SendCoordinator,
    status: StatusAccessor,
}

impl Harness {
    fn new() -> Self {
        Self::with_retries(0)
    }

    fn with_retries(retries: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCredentialStore::new(dir.path()));
        let factory = Arc::new(FakeFactory::default());
        let registry = SessionRegistry::new();
        let manager = SessionManager::new(
            registry.clone(),
            store.clone(),
            factory.clone(),
            LifecycleOptions::default(),
        );
        let sender = SendCoordinator::new(manager.clone()).with_retries(retries);
        let status = StatusAccessor::new(registry);
        Self { _dir: dir, store, factory, manager, sender, status }
    }

    async fn connected(&self, id: &str) {
        self.manager.initialize(id).await.unwrap();
        self.factory.open(id);
        self.wait_for(|| self.status.status(id) == SessionState::Connected).await;
    }

    /// Let spawned tasks run until `cond` holds.
    async fn wait_for(&self, cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    /// Give spawned tasks a chance to run without advancing far in time.
    async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }
}

// ── Lifecycle ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_initialize_constructs_one_client() {
    let h = Harness::new();
    *h.factory.delay.lock() = Some(Duration::from_millis(50));

    let (a, b) = tokio::join!(h.manager.initialize("A"), h.manager.initialize("A"));
    a.unwrap();
    b.unwrap();

    assert_eq!(h.factory.created(), 1);
    assert_eq!(h.status.status("A"), SessionState::Connecting);

    // Once construction finished, a further call is a no-op too.
    h.manager.initialize("A").await.unwrap();
    assert_eq!(h.factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn qr_then_open_scenario() {
    let h = Harness::new();
    h.manager.initialize("A").await.unwrap();

    h.factory.qr("A", "XYZ");
    h.wait_for(|| h.status.status("A") == SessionState::AwaitingQr).await;
    assert_eq!(h.status.qr("A").as_deref(), Some("XYZ"));
    // Reading is idempotent.
    assert_eq!(h.status.qr("A").as_deref(), Some("XYZ"));

    h.factory.open("A");
    h.wait_for(|| h.status.status("A") == SessionState::Connected).await;
    assert!(h.status.qr("A").is_none());
}

#[tokio::test(start_paused = true)]
async fn newer_qr_replaces_older_one() {
    let h = Harness::new();
    h.manager.initialize("A").await.unwrap();
    h.factory.qr("A", "first");
    h.factory.qr("A", "second");
    h.wait_for(|| h.status.qr("A").as_deref() == Some("second")).await;
    assert_eq!(h.status.status("A"), SessionState::AwaitingQr);
}

#[tokio::test(start_paused = true)]
async fn open_without_identity_reconnects() {
    let h = Harness::new();
    h.manager.initialize("A").await.unwrap();
    let (first, _) = h.factory.latest("A");

    h.factory.emit("A", ConnectionUpdate::Opened.into());
    h.wait_for(|| h.status.status("A") == SessionState::Disconnected).await;
    assert!(first.closed.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_secs(6)).await;
    h.wait_for(|| h.factory.created() == 2).await;
    h.factory.open("A");
    h.wait_for(|| h.status.status("A") == SessionState::Connected).await;

    let outcome = h.sender.send("A", "5511", "hi").await.unwrap();
    assert!(outcome.is_sent());
}

#[tokio::test(start_paused = true)]
async fn late_events_from_identityless_client_are_ignored() {
    let h = Harness::new();
    h.manager.initialize("A").await.unwrap();
    let (_, events) = h.factory.latest("A");

    h.factory.emit("A", ConnectionUpdate::Opened.into());
    h.wait_for(|| h.status.status("A") == SessionState::Disconnected).await;

    let _ = events.send(ConnectionUpdate::Qr("late".into()).into());
    h.settle().await;
    assert_eq!(h.status.status("A"), SessionState::Disconnected);
    assert!(h.status.qr("A").is_none());
}

#[tokio::test(start_paused = true)]
async fn credential_updates_are_persisted_and_reused() {
    let h = Harness::new();
    h.manager.initialize("A").await.unwrap();
    h.factory.creds("A", json!({"step": 1}));
    h.factory.creds("A", json!({"step": 2}));
    h.wait_for(|| {
        h.store.load("A").ok().flatten().map(|b| b.into_value()) == Some(json!({"step": 2}))
    })
    .await;

    // A transient drop reconnects with the stored credentials.
    h.factory.open("A");
    h.wait_for(|| h.status.status("A") == SessionState::Connected).await;
    h.factory.close("A", Some(428));
    tokio::time::sleep(Duration::from_secs(6)).await;
    h.wait_for(|| h.factory.created() == 2).await;
    assert_eq!(
        h.factory.credentials_of_latest("A").map(|b| b.into_value()),
        Some(json!({"step": 2}))
    );
}

#[tokio::test(start_paused = true)]
async fn logged_out_close_destroys_session_and_credentials() {
    let h = Harness::new();
    h.connected("A").await;
    h.factory.creds("A", json!({"me": "A"}));
    h.wait_for(|| h.store.load("A").ok().flatten().is_some()).await;
    let (client, _) = h.factory.latest("A");

    h.factory.close("A", Some(401));
    h.wait_for(|| !h.manager.registry().contains("A")).await;

    assert_eq!(h.status.status("A"), SessionState::Disconnected);
    assert!(h.store.load("A").unwrap().is_none());
    assert!(client.closed.load(Ordering::SeqCst));

    // Nothing is resurrected later.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.factory.created(), 1);
    assert!(!h.manager.registry().contains("A"));
}

#[tokio::test(start_paused = true)]
async fn transient_close_reconnects_after_delay() {
    let h = Harness::new();
    h.connected("A").await;
    let (first, _) = h.factory.latest("A");

    h.factory.close("A", Some(428));
    h.wait_for(|| h.status.status("A") == SessionState::Disconnected).await;
    assert!(first.closed.load(Ordering::SeqCst));

    // Nothing happens before the 5 s delay.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.factory.created(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.wait_for(|| h.factory.created() == 2).await;
    assert_eq!(h.status.status("A"), SessionState::Connecting);

    h.factory.open("A");
    h.wait_for(|| h.status.status("A") == SessionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn close_without_reason_is_transient() {
    let h = Harness::new();
    h.connected("A").await;
    h.factory.close("A", None);
    h.wait_for(|| h.status.status("A") == SessionState::Disconnected).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    h.wait_for(|| h.factory.created() == 2).await;
}

#[tokio::test(start_paused = true)]
async fn consecutive_failures_back_off() {
    let h = Harness::new();
    h.connected("A").await;

    // First drop: retry after 5 s.
    h.factory.close("A", Some(500));
    h.wait_for(|| h.status.status("A") == SessionState::Disconnected).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    h.wait_for(|| h.factory.created() == 2).await;

    // Drops again before opening: next retry waits 10 s.
    h.factory.close("A", Some(500));
    h.wait_for(|| h.status.status("A") == SessionState::Disconnected).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.factory.created(), 2);
    tokio::time::sleep(Duration::from_secs(5)).await;
    h.wait_for(|| h.factory.created() == 3).await;
}

#[tokio::test(start_paused = true)]
async fn failed_reconnect_is_rescheduled() {
    let h = Harness::new();
    h.connected("A").await;
    h.factory.close("A", Some(500));
    h.wait_for(|| h.status.status("A") == SessionState::Disconnected).await;

    h.factory.fail_next.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(6)).await;
    h.wait_for(|| h.factory.created() == 2).await;
    assert_eq!(h.status.status("A"), SessionState::Disconnected);
    assert!(h.manager.registry().contains("A"));

    tokio::time::sleep(Duration::from_secs(11)).await;
    h.wait_for(|| h.factory.created() == 3).await;
    assert_eq!(h.factory.connection_count("A"), 2);
    h.factory.open("A");
    h.wait_for(|| h.status.status("A") == SessionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn logout_cancels_pending_reconnect() {
    let h = Harness::new();
    h.connected("A").await;
    h.factory.close("A", Some(428));
    h.wait_for(|| h.status.status("A") == SessionState::Disconnected).await;

    h.manager.logout("A").await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(h.factory.created(), 1);
    assert!(!h.manager.registry().contains("A"));
}

#[tokio::test(start_paused = true)]
async fn explicit_logout_unlinks_client() {
    let h = Harness::new();
    h.connected("A").await;
    h.factory.creds("A", json!({"k": 1}));
    h.wait_for(|| h.store.load("A").ok().flatten().is_some()).await;
    let (client, _) = h.factory.latest("A");

    h.manager.logout("A").await.unwrap();
    assert!(client.logged_out.load(Ordering::SeqCst));
    assert!(h.store.load("A").unwrap().is_none());
    assert_eq!(h.status.status("A"), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn events_from_superseded_client_are_ignored() {
    let h = Harness::new();
    h.connected("A").await;
    let (_, old_events) = h.factory.latest("A");

    h.factory.close("A", Some(428));
    tokio::time::sleep(Duration::from_secs(6)).await;
    h.wait_for(|| h.factory.created() == 2).await;

    let _ = old_events.send(ConnectionUpdate::Qr("stale".into()).into());
    h.settle().await;
    assert!(h.status.qr("A").is_none());
    assert_eq!(h.status.status("A"), SessionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn construction_failure_leaves_session_absent() {
    let h = Harness::new();
    h.factory.fail_next.store(true, Ordering::SeqCst);

    let err = h.manager.initialize("A").await.unwrap_err();
    assert!(matches!(err, EngineError::SessionInit { .. }));
    assert!(!h.manager.registry().contains("A"));
    assert_eq!(h.status.status("A"), SessionState::Disconnected);

    // The guard was released; a retry goes through.
    h.manager.initialize("A").await.unwrap();
    assert_eq!(h.factory.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn empty_id_is_rejected() {
    let h = Harness::new();
    let err = h.manager.initialize("  ").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
    assert_eq!(h.factory.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_every_client() {
    let h = Harness::new();
    h.connected("A").await;
    h.manager.initialize("B").await.unwrap();
    let (a, _) = h.factory.latest("A");
    let (b, _) = h.factory.latest("B");

    h.manager.shutdown().await;
    assert!(a.closed.load(Ordering::SeqCst));
    assert!(b.closed.load(Ordering::SeqCst));
    assert!(h.manager.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn sessions_are_independent() {
    let h = Harness::new();
    h.connected("A").await;
    h.manager.initialize("B").await.unwrap();
    h.factory.qr("B", "QRB");
    h.wait_for(|| h.status.status("B") == SessionState::AwaitingQr).await;

    h.factory.close("A", Some(401));
    h.wait_for(|| !h.manager.registry().contains("A")).await;
    assert_eq!(h.status.status("B"), SessionState::AwaitingQr);
    assert_eq!(h.status.qr("B").as_deref(), Some("QRB"));
}

// ── Send ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn send_on_unknown_session_requires_pairing() {
    let h = Harness::new();
    let outcome = h.sender.send("A", "5511999", "hi").await.unwrap();
    assert!(matches!(outcome, SendOutcome::PairingRequired { qr: None, .. }));
    assert!(matches!(
        h.status.status("A"),
        SessionState::Connecting | SessionState::AwaitingQr
    ));
    assert_eq!(h.factory.created(), 1);

    // Once a QR exists it is handed back to the caller.
    h.factory.qr("A", "XYZ");
    h.wait_for(|| h.status.qr("A").is_some()).await;
    let outcome = h.sender.send("A", "5511999", "hi").await.unwrap();
    assert_eq!(
        outcome,
        SendOutcome::PairingRequired {
            qr: Some("XYZ".into()),
            message: wa_gateway::atoms::constants::PAIRING_REQUIRED_MESSAGE.into(),
        }
    );
    assert_eq!(h.factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn send_with_failing_construction_requires_pairing() {
    let h = Harness::new();
    h.factory.fail_next.store(true, Ordering::SeqCst);

    let outcome = h.sender.send("A", "5511", "hi").await.unwrap();
    assert!(matches!(outcome, SendOutcome::PairingRequired { qr: None, .. }));
    assert_eq!(h.status.status("A"), SessionState::Disconnected);
    assert!(!h.manager.registry().contains("A"));

    // The next attempt starts the session normally.
    let outcome = h.sender.send("A", "5511", "hi").await.unwrap();
    assert!(!outcome.is_sent());
    assert_eq!(h.status.status("A"), SessionState::Connecting);
    assert_eq!(h.factory.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn send_normalizes_destination() {
    let h = Harness::new();
    h.connected("A").await;

    let outcome = h.sender.send("A", "+55 (11) 9999-8888", "hello").await.unwrap();
    assert_eq!(outcome, SendOutcome::Sent { message_id: "MSG1".into() });

    let (client, _) = h.factory.latest("A");
    assert_eq!(
        client.sent.lock().clone(),
        vec![("551199998888@s.whatsapp.net".to_string(), "hello".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn send_rejects_destination_without_digits() {
    let h = Harness::new();
    h.connected("A").await;
    let err = h.sender.send("A", "no digits", "hello").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidDestination(_)));
    assert_eq!(h.status.status("A"), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn send_rejects_empty_body() {
    let h = Harness::new();
    let err = h.sender.send("A", "5511", "   ").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
    assert_eq!(h.factory.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn send_failure_invalidates_session() {
    let h = Harness::new();
    h.connected("A").await;
    h.factory.creds("A", json!({"k": 1}));
    h.wait_for(|| h.store.load("A").ok().flatten().is_some()).await;
    let (client, _) = h.factory.latest("A");
    client.failing_sends.store(1, Ordering::SeqCst);

    let outcome = h.sender.send("A", "5511", "hello").await.unwrap();
    assert!(matches!(outcome, SendOutcome::PairingRequired { .. }));
    assert!(client.closed.load(Ordering::SeqCst));
    assert!(h.store.load("A").unwrap().is_none());
    assert_eq!(h.status.status("A"), SessionState::Disconnected);

    // No reconnection is scheduled for an invalidated session.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn bounded_retry_recovers_before_invalidating() {
    let h = Harness::with_retries(1);
    h.connected("A").await;
    let (client, _) = h.factory.latest("A");
    client.failing_sends.store(1, Ordering::SeqCst);

    let outcome = h.sender.send("A", "5511", "hello").await.unwrap();
    assert!(outcome.is_sent());
    assert_eq!(h.status.status("A"), SessionState::Connected);
    assert!(!client.closed.load(Ordering::SeqCst));
}

// ── HTTP ───────────────────────────────────────────────────────────────

async fn spawn_server(h: &Harness) -> String {
    let state = AppState::new(h.manager.clone(), h.sender.clone(), None);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, state, std::future::pending::<()>()));
    format!("http://{addr}")
}

#[tokio::test]
async fn http_health_and_validation() {
    let h = Harness::new();
    let base = spawn_server(&h).await;
    let http = reqwest::Client::new();

    let resp = http.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "WhatsApp gateway is online");

    let resp = http.get(format!("{base}/status")).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    let resp = http.post(format!("{base}/connect")).json(&json!({})).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    let resp = http
        .post(format!("{base}/send"))
        .json(&json!({"sourceId": "A", "destination": "5511"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn http_connect_status_and_send_flow() {
    let h = Harness::new();
    let base = spawn_server(&h).await;
    let http = reqwest::Client::new();

    let body: Value = http
        .post(format!("{base}/connect"))
        .json(&json!({"id": "A"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "connecting");
    assert!(body["qr"].is_null());

    h.factory.qr("A", "XYZ");
    h.wait_for(|| h.status.qr("A").is_some()).await;

    let body: Value = http
        .get(format!("{base}/status?id=A"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "awaiting_qr", "qr": "XYZ"}));

    let resp = http
        .post(format!("{base}/send"))
        .json(&json!({"sourceId": "A", "destination": "+55 11 9999", "message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["pairingRequired"], true);
    assert_eq!(body["qr"], "XYZ");

    h.factory.open("A");
    h.wait_for(|| h.status.status("A") == SessionState::Connected).await;

    let body: Value = http
        .post(format!("{base}/send"))
        .json(&json!({"sourceId": "A", "destination": "+55 11 9999", "message": "hi"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"success": true, "messageId": "MSG1"}));

    let resp = http
        .post(format!("{base}/send"))
        .json(&json!({"sourceId": "A", "destination": "abc", "message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let sessions: Value = http.get(format!("{base}/sessions")).send().await.unwrap().json().await.unwrap();
    assert_eq!(sessions, json!([{"id": "A", "status": "connected"}]));

    let body: Value = http
        .post(format!("{base}/logout"))
        .json(&json!({"id": "A"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "disconnected");
}

#[tokio::test]
async fn http_connect_surfaces_init_failure_as_500() {
    let h = Harness::new();
    h.factory.fail_next.store(true, Ordering::SeqCst);
    let base = spawn_server(&h).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/connect"))
        .json(&json!({"id": "A"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
}
