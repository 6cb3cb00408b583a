// WhatsApp Gateway — Evolution API Client
// EvolutionClientFactory, EvolutionClient, create/delete/connect instance,
// connection state, owner lookup, extract_qr_from_response, sendText
//
// Evolution API wraps Baileys (WhatsApp Web multi-device) behind REST +
// webhooks. Each gateway session maps to one Evolution instance; the
// credential blob the gateway persists is the instance name and token.

use super::client::{ClientConnection, ClientEvent, ClientFactory, ConnectionClient, ConnectionUpdate, EventSender};
use super::config::EvolutionConfig;
use super::credentials::CredentialBlob;
use super::webhook::WebhookHub;
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::http::{build_http_client, preview};
use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

const CHANNEL: &str = "evolution";

// ── Credentials ────────────────────────────────────────────────────────

/// What the gateway persists for an Evolution-backed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionCredentials {
    pub instance_name: String,
    pub token: String,
}

/// `{prefix}-{id}` with everything outside `[A-Za-z0-9_-]` replaced by `-`.
pub fn instance_name_for(prefix: &str, id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    format!("{prefix}-{safe}")
}

fn new_instance_token() -> String {
    format!("wa-{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

// ── REST wrapper ───────────────────────────────────────────────────────

/// REST calls scoped to one instance.
#[derive(Clone)]
struct InstanceApi {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    instance_name: String,
}

impl InstanceApi {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), path)
    }

    /// Create the instance and return `(qr, token)`. An instance/token
    /// conflict deletes the existing instance and retries once.
    async fn create(&self, webhook_url: &str) -> EngineResult<(String, String)> {
        match self.try_create(webhook_url).await? {
            CreateResult::Created { qr, token } => Ok((qr, token)),
            CreateResult::Conflict => {
                info!("[whatsapp] Instance/token conflict for {}, deleting and recreating", self.instance_name);
                self.delete().await;
                match self.try_create(webhook_url).await? {
                    CreateResult::Created { qr, token } => Ok((qr, token)),
                    CreateResult::Conflict => Err(EngineError::channel(
                        CHANNEL,
                        format!("instance {} still exists after delete", self.instance_name),
                    )),
                }
            }
        }
    }

    async fn try_create(&self, webhook_url: &str) -> EngineResult<CreateResult> {
        // Unique token per attempt avoids "Token already exists" collisions.
        let token = new_instance_token();
        let body = json!({
            "instanceName": self.instance_name,
            "token": token,
            "qrcode": true,
            "webhook": webhook_url,
        });

        info!("[whatsapp] Creating instance '{}'", self.instance_name);

        let resp = self
            .http
            .post(self.url("instance/create"))
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        info!("[whatsapp] Instance create response [{}]: {}", status, preview(&text, 500));

        if !status.is_success() {
            let lower = text.to_lowercase();
            let instance_exists = lower.contains("instance") && (lower.contains("already") || lower.contains("exists"));
            let token_exists = lower.contains("token") && lower.contains("already");
            if instance_exists || token_exists {
                return Ok(CreateResult::Conflict);
            }
            return Err(EngineError::channel(
                CHANNEL,
                format!("create instance failed ({}): {}", status, preview(&text, 200)),
            ));
        }

        let resp_json: Value = serde_json::from_str(&text)?;
        let token = resp_json["hash"]["apikey"]
            .as_str()
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or(token);
        Ok(CreateResult::Created {
            qr: extract_qr_from_response(&resp_json),
            token,
        })
    }

    async fn delete(&self) {
        let url = self.url(&format!("instance/delete/{}", self.instance_name));
        match self.http.delete(&url).header("apikey", &self.api_key).send().await {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                info!("[whatsapp] Delete instance response [{}]: {}", status, preview(&text, 200));
            }
            Err(e) => warn!("[whatsapp] Delete instance failed: {}", e),
        }
        // Brief pause to let the API settle
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }

    /// Ask an existing instance to (re)connect. `Ok(None)` means the instance
    /// does not exist upstream; `Ok(Some(qr))` may carry an empty QR when the
    /// instance is already paired.
    async fn connect(&self) -> EngineResult<Option<String>> {
        let url = self.url(&format!("instance/connect/{}", self.instance_name));
        let resp = self.http.get(&url).header("apikey", &self.api_key).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = resp.text().await.unwrap_or_default();
        info!("[whatsapp] Connect instance response [{}]: {}", status, preview(&text, 500));
        if !status.is_success() {
            return Err(EngineError::channel(
                CHANNEL,
                format!("connect instance failed ({}): {}", status, preview(&text, 200)),
            ));
        }
        let resp_json: Value = serde_json::from_str(&text).unwrap_or_default();
        Ok(Some(extract_qr_from_response(&resp_json)))
    }

    async fn connection_state(&self) -> EngineResult<String> {
        let url = self.url(&format!("instance/connectionState/{}", self.instance_name));
        let body: Value = self
            .http
            .get(&url)
            .header("apikey", &self.api_key)
            .send()
            .await?
            .json()
            .await?;
        Ok(body["instance"]["state"]
            .as_str()
            .or_else(|| body["state"].as_str())
            .unwrap_or("")
            .to_string())
    }

    /// Own JID of a connected instance.
    async fn fetch_owner(&self) -> EngineResult<Option<String>> {
        let url = self.url("instance/fetchInstances");
        let body: Value = self
            .http
            .get(&url)
            .query(&[("instanceName", self.instance_name.as_str())])
            .header("apikey", &self.api_key)
            .send()
            .await?
            .json()
            .await?;
        Ok(extract_owner(&body))
    }

    async fn logout(&self) {
        let url = self.url(&format!("instance/logout/{}", self.instance_name));
        match self.http.delete(&url).header("apikey", &self.api_key).send().await {
            Ok(resp) => info!("[whatsapp] Logout instance {} [{}]", self.instance_name, resp.status()),
            Err(e) => warn!("[whatsapp] Logout instance {} failed: {}", self.instance_name, e),
        }
    }

    async fn send_text(&self, number: &str, text: &str) -> EngineResult<String> {
        let url = self.url(&format!("message/sendText/{}", self.instance_name));
        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&json!({ "number": number, "text": text }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(EngineError::channel(
                CHANNEL,
                format!("sendText failed ({}): {}", status, preview(&body, 200)),
            ));
        }
        let resp_json: Value = serde_json::from_str(&body).unwrap_or_default();
        Ok(resp_json["key"]["id"].as_str().unwrap_or_default().to_string())
    }
}

enum CreateResult {
    Created { qr: String, token: String },
    Conflict,
}

// ── Response parsing ───────────────────────────────────────────────────

/// Extract the QR payload from the various Evolution response shapes.
pub fn extract_qr_from_response(resp: &Value) -> String {
    // create: { "qrcode": { "base64": "data:image/..." } }
    // connect: { "base64": "data:image/..." }
    // also:    { "qrcode": "data:image/..." } or { "code": "2@..." }
    let qr = resp["qrcode"]["base64"]
        .as_str()
        .or_else(|| resp["base64"].as_str())
        .or_else(|| resp["qrcode"].as_str().filter(|s| s.starts_with("data:")))
        .or_else(|| resp["code"].as_str())
        .unwrap_or("")
        .to_string();

    if qr.is_empty() {
        let qr_field = &resp["qrcode"];
        warn!(
            "[whatsapp] QR extraction returned empty. qrcode field type: {}",
            if qr_field.is_object() {
                "object"
            } else if qr_field.is_string() {
                "string"
            } else if qr_field.is_null() {
                "null"
            } else {
                "other"
            }
        );
    } else {
        info!("[whatsapp] QR code extracted ({} bytes)", qr.len());
    }
    qr
}

fn extract_owner(body: &Value) -> Option<String> {
    let entry = body.as_array().and_then(|a| a.first()).unwrap_or(body);
    entry["instance"]["owner"]
        .as_str()
        .or_else(|| entry["ownerJid"].as_str())
        .or_else(|| entry["owner"].as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ── Factory ────────────────────────────────────────────────────────────

/// Builds Evolution-backed clients. Events arrive through `hub`, which the
/// HTTP layer feeds from the webhook route.
pub struct EvolutionClientFactory {
    config: EvolutionConfig,
    webhook_url: String,
    hub: WebhookHub,
    http: reqwest::Client,
}

impl EvolutionClientFactory {
    pub fn new(config: EvolutionConfig, webhook_url: impl Into<String>, hub: WebhookHub) -> EngineResult<Self> {
        Ok(Self {
            config,
            webhook_url: webhook_url.into(),
            hub,
            http: build_http_client()?,
        })
    }

    fn api_for(&self, instance_name: String) -> InstanceApi {
        InstanceApi {
            http: self.http.clone(),
            api_url: self.config.api_url.clone(),
            api_key: self.config.api_key.clone(),
            instance_name,
        }
    }

    /// Fresh instance: create, persist its credentials, surface the QR.
    async fn provision(&self, api: &InstanceApi, events: &EventSender) -> EngineResult<()> {
        let (qr, token) = api.create(&self.webhook_url).await?;
        let credentials = EvolutionCredentials {
            instance_name: api.instance_name.clone(),
            token,
        };
        let _ = events.send(ClientEvent::CredentialsUpdated(CredentialBlob::new(
            serde_json::to_value(&credentials)?,
        )));
        if !qr.is_empty() {
            let _ = events.send(ClientEvent::Connection(ConnectionUpdate::Qr(qr)));
        }
        Ok(())
    }

    /// Known instance: reconnect it, falling back to provisioning when it
    /// vanished upstream.
    async fn resume(
        &self,
        api: &InstanceApi,
        identity: &Mutex<Option<String>>,
        events: &EventSender,
    ) -> EngineResult<()> {
        let Some(qr) = api.connect().await? else {
            info!("[whatsapp] Instance {} missing upstream — provisioning a new one", api.instance_name);
            return self.provision(api, events).await;
        };
        if !qr.is_empty() {
            let _ = events.send(ClientEvent::Connection(ConnectionUpdate::Qr(qr)));
            return Ok(());
        }

        // Already paired: no state change will be pushed, so report it now.
        let state = api.connection_state().await?;
        if state == "open" || state == "connected" {
            match api.fetch_owner().await {
                Ok(owner) => *identity.lock() = owner,
                Err(e) => warn!("[whatsapp] Owner lookup for {} failed: {}", api.instance_name, e),
            }
            let _ = events.send(ClientEvent::Connection(ConnectionUpdate::Opened));
        }
        Ok(())
    }
}

#[async_trait]
impl ClientFactory for EvolutionClientFactory {
    async fn create(&self, id: &str, credentials: Option<CredentialBlob>) -> EngineResult<ClientConnection> {
        let saved = credentials.and_then(|blob| {
            serde_json::from_value::<EvolutionCredentials>(blob.into_value())
                .map_err(|e| warn!("[whatsapp] Ignoring unreadable credentials for {}: {}", id, e))
                .ok()
        });
        let instance_name = saved
            .as_ref()
            .map(|c| c.instance_name.clone())
            .unwrap_or_else(|| instance_name_for(&self.config.instance_prefix, id));

        let (tx, rx) = mpsc::unbounded_channel();
        let identity = Arc::new(Mutex::new(None));
        // Register before any API call so early webhooks are not lost.
        let token = self.hub.register(&instance_name, tx.clone(), identity.clone());

        let api = self.api_for(instance_name);
        let result = match saved {
            Some(_) => self.resume(&api, &identity, &tx).await,
            None => self.provision(&api, &tx).await,
        };
        if let Err(e) = result {
            self.hub.unregister(&api.instance_name, token);
            return Err(e);
        }

        let client = EvolutionClient {
            api,
            hub: self.hub.clone(),
            hub_token: token,
            identity,
        };
        Ok(ClientConnection {
            client: Arc::new(client),
            events: rx,
        })
    }
}

// ── Client ─────────────────────────────────────────────────────────────

pub struct EvolutionClient {
    api: InstanceApi,
    hub: WebhookHub,
    hub_token: u64,
    identity: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl ConnectionClient for EvolutionClient {
    fn identity(&self) -> Option<String> {
        self.identity.lock().clone()
    }

    async fn send_text(&self, address: &str, body: &str) -> EngineResult<String> {
        self.api.send_text(address, body).await
    }

    async fn close(&self) {
        self.hub.unregister(&self.api.instance_name, self.hub_token);
    }

    async fn logout(&self) {
        self.api.logout().await;
        self.close().await;
    }
}
