// WhatsApp Gateway — Evolution Webhook Intake
// WebhookHub (instance → event sink), parse_webhook_event
//
// Evolution API posts every instance event to one URL. The hub maps the
// instance name in the payload back to the client that owns it and forwards
// the decoded event into that client's stream.

use super::client::{ClientEvent, ConnectionUpdate, EventSender};
use log::{debug, info};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ── Parsing ────────────────────────────────────────────────────────────

/// One decoded webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub instance: String,
    pub update: ConnectionUpdate,
    /// Own JID of the instance, when the payload carries it.
    pub owner: Option<String>,
}

/// Decode an Evolution webhook payload. Events the gateway does not track
/// (messages, presence, contacts…) yield `None`.
pub fn parse_webhook_event(payload: &Value) -> Option<WebhookEvent> {
    let instance = payload["instance"]
        .as_str()
        .or_else(|| payload["instance"]["instanceName"].as_str())
        .or_else(|| payload["data"]["instance"].as_str())?
        .to_string();

    // v1 sends "qrcode.updated", global webhooks send "QRCODE_UPDATED".
    let event = payload["event"].as_str()?.to_lowercase().replace('_', ".");
    let data = &payload["data"];

    let owner = data["wuid"]
        .as_str()
        .or_else(|| payload["sender"].as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let update = match event.as_str() {
        "qrcode.updated" => {
            let qr = data["qrcode"]["base64"]
                .as_str()
                .or_else(|| data["qrcode"].as_str())
                .unwrap_or("");
            if qr.is_empty() {
                return None;
            }
            ConnectionUpdate::Qr(qr.to_string())
        }
        "connection.update" => match data["state"].as_str().unwrap_or("") {
            "open" | "connected" => ConnectionUpdate::Opened,
            "close" | "closed" => ConnectionUpdate::Closed {
                status_code: status_code(&data["statusReason"]),
            },
            _ => return None,
        },
        "logout.instance" => ConnectionUpdate::Closed {
            status_code: Some(crate::atoms::constants::LOGGED_OUT_STATUS),
        },
        _ => return None,
    };

    Some(WebhookEvent { instance, update, owner })
}

fn status_code(value: &Value) -> Option<u16> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .and_then(|code| u16::try_from(code).ok())
}

// ── Hub ────────────────────────────────────────────────────────────────

struct InstanceSink {
    token: u64,
    events: EventSender,
    identity: Arc<Mutex<Option<String>>>,
}

/// Routes decoded webhook events to the client registered for an instance.
#[derive(Clone, Default)]
pub struct WebhookHub {
    sinks: Arc<Mutex<HashMap<String, InstanceSink>>>,
    next_token: Arc<AtomicU64>,
}

impl WebhookHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the sink for `instance`, replacing any previous one.
    /// Returns the token needed to unregister it.
    pub(crate) fn register(
        &self,
        instance: &str,
        events: EventSender,
        identity: Arc<Mutex<Option<String>>>,
    ) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.sinks
            .lock()
            .insert(instance.to_string(), InstanceSink { token, events, identity });
        debug!("[whatsapp] Webhook sink registered for instance {}", instance);
        token
    }

    /// Remove the sink for `instance` only if it is still the one `token` registered.
    pub(crate) fn unregister(&self, instance: &str, token: u64) {
        let mut sinks = self.sinks.lock();
        if sinks.get(instance).is_some_and(|s| s.token == token) {
            sinks.remove(instance);
            debug!("[whatsapp] Webhook sink removed for instance {}", instance);
        }
    }

    pub fn is_registered(&self, instance: &str) -> bool {
        self.sinks.lock().contains_key(instance)
    }

    /// Decode `payload` and forward it. Returns `true` when an event was delivered.
    pub fn dispatch(&self, payload: &Value) -> bool {
        let Some(event) = parse_webhook_event(payload) else {
            return false;
        };
        let sinks = self.sinks.lock();
        let Some(sink) = sinks.get(&event.instance) else {
            debug!("[whatsapp] Webhook for unknown instance {} ignored", event.instance);
            return false;
        };

        if event.update == ConnectionUpdate::Opened {
            if let Some(owner) = event.owner {
                info!("[whatsapp] Instance {} authenticated as {}", event.instance, owner);
                *sink.identity.lock() = Some(owner);
            }
        }
        sink.events.send(ClientEvent::Connection(event.update)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn parses_qr_update() {
        let event = parse_webhook_event(&json!({
            "event": "qrcode.updated",
            "instance": "wa-A",
            "data": { "qrcode": { "base64": "data:image/png;base64,AAA", "code": "2@xyz" } }
        }))
        .unwrap();
        assert_eq!(event.instance, "wa-A");
        assert_eq!(event.update, ConnectionUpdate::Qr("data:image/png;base64,AAA".into()));
    }

    #[test]
    fn parses_global_style_event_names() {
        let event = parse_webhook_event(&json!({
            "event": "CONNECTION_UPDATE",
            "instance": "wa-A",
            "data": { "state": "open", "wuid": "5511@s.whatsapp.net" }
        }))
        .unwrap();
        assert_eq!(event.update, ConnectionUpdate::Opened);
        assert_eq!(event.owner.as_deref(), Some("5511@s.whatsapp.net"));
    }

    #[test]
    fn parses_close_with_status_reason() {
        let event = parse_webhook_event(&json!({
            "event": "connection.update",
            "instance": "wa-A",
            "data": { "state": "close", "statusReason": 401 }
        }))
        .unwrap();
        assert_eq!(event.update, ConnectionUpdate::Closed { status_code: Some(401) });

        let event = parse_webhook_event(&json!({
            "event": "connection.update",
            "instance": "wa-A",
            "data": { "state": "close" }
        }))
        .unwrap();
        assert_eq!(event.update, ConnectionUpdate::Closed { status_code: None });
    }

    #[test]
    fn logout_event_maps_to_logged_out_close() {
        let event = parse_webhook_event(&json!({
            "event": "logout.instance",
            "instance": "wa-A",
            "data": {}
        }))
        .unwrap();
        assert_eq!(event.update, ConnectionUpdate::Closed { status_code: Some(401) });
    }

    #[test]
    fn ignores_untracked_events() {
        assert!(parse_webhook_event(&json!({"event": "messages.upsert", "instance": "wa-A"})).is_none());
        assert!(parse_webhook_event(&json!({
            "event": "connection.update", "instance": "wa-A", "data": {"state": "connecting"}
        }))
        .is_none());
        assert!(parse_webhook_event(&json!({"event": "qrcode.updated"})).is_none());
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_instance() {
        let hub = WebhookHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let identity = Arc::new(Mutex::new(None));
        hub.register("wa-A", tx, identity.clone());

        assert!(hub.dispatch(&json!({
            "event": "connection.update",
            "instance": "wa-A",
            "sender": "5511@s.whatsapp.net",
            "data": { "state": "open" }
        })));
        assert_eq!(rx.recv().await, Some(ClientEvent::Connection(ConnectionUpdate::Opened)));
        assert_eq!(identity.lock().as_deref(), Some("5511@s.whatsapp.net"));

        assert!(!hub.dispatch(&json!({
            "event": "connection.update", "instance": "wa-B", "data": { "state": "open" }
        })));
    }

    #[test]
    fn stale_token_does_not_unregister_replacement() {
        let hub = WebhookHub::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let old = hub.register("wa-A", tx1, Arc::new(Mutex::new(None)));
        let new = hub.register("wa-A", tx2, Arc::new(Mutex::new(None)));
        hub.unregister("wa-A", old);
        assert!(hub.is_registered("wa-A"));
        hub.unregister("wa-A", new);
        assert!(!hub.is_registered("wa-A"));
    }
}
