// Gateway Engine — HTTP API
//
// Thin axum layer over the session engine:
//   GET  /                 → health text
//   POST /connect          → start (or reuse) a session, returns {qr, status}
//   GET  /status?id=       → {status, qr}
//   GET  /sessions         → every known session
//   POST /send             → {success, messageId} or {pairingRequired, qr, message}
//   POST /logout           → unlink a session and delete its credentials
//   POST /webhook/whatsapp → Evolution API event intake
//
// Caller mistakes map to 400, engine failures to 500. "Pairing required" is a
// normal 200 response.

use crate::atoms::constants::{HEALTH_TEXT, WEBHOOK_PATH};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::SendOutcome;
use crate::engine::whatsapp::{SendCoordinator, SessionManager, StatusAccessor, WebhookHub};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

// ── State ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub sender: SendCoordinator,
    pub status: StatusAccessor,
    /// Present when sessions are backed by Evolution API.
    pub webhooks: Option<WebhookHub>,
}

impl AppState {
    pub fn new(manager: SessionManager, sender: SendCoordinator, webhooks: Option<WebhookHub>) -> Self {
        let status = StatusAccessor::new(manager.registry().clone());
        Self { manager, sender, status, webhooks }
    }
}

// ── Errors ─────────────────────────────────────────────────────────────

pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_caller_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!("[gateway] Request failed: {}", self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn require(field: &str, value: Option<String>) -> EngineResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EngineError::InvalidRequest(format!("{field} is required")))
}

// ── Requests ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionRequest {
    pub id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SendRequest {
    pub source_id: Option<String>,
    pub destination: Option<String>,
    pub message: Option<String>,
}

// ── Handlers ───────────────────────────────────────────────────────────

async fn health() -> &'static str {
    HEALTH_TEXT
}

async fn connect(State(state): State<AppState>, Json(req): Json<SessionRequest>) -> ApiResult<Json<Value>> {
    let id = require("id", req.id)?;
    state.manager.initialize(&id).await?;
    let snapshot = state.status.snapshot(&id);
    Ok(Json(json!({ "qr": snapshot.qr, "status": snapshot.status })))
}

async fn status(State(state): State<AppState>, Query(req): Query<SessionRequest>) -> ApiResult<Json<Value>> {
    let id = require("id", req.id)?;
    let snapshot = state.status.snapshot(&id);
    Ok(Json(json!({ "status": snapshot.status, "qr": snapshot.qr })))
}

async fn sessions(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.status.list()))
}

async fn send(State(state): State<AppState>, Json(req): Json<SendRequest>) -> ApiResult<Json<Value>> {
    let source_id = require("sourceId", req.source_id)?;
    let destination = require("destination", req.destination)?;
    let message = req
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| EngineError::InvalidRequest("message is required".into()))?;

    let body = match state.sender.send(&source_id, &destination, &message).await? {
        SendOutcome::Sent { message_id } => json!({ "success": true, "messageId": message_id }),
        SendOutcome::PairingRequired { qr, message } => json!({
            "success": false,
            "pairingRequired": true,
            "qr": qr,
            "message": message,
        }),
    };
    Ok(Json(body))
}

async fn logout(State(state): State<AppState>, Json(req): Json<SessionRequest>) -> ApiResult<Json<Value>> {
    let id = require("id", req.id)?;
    state.manager.logout(&id).await?;
    Ok(Json(json!({ "status": state.status.status(&id) })))
}

async fn webhook(State(state): State<AppState>, Json(payload): Json<Value>) -> StatusCode {
    match &state.webhooks {
        Some(hub) => {
            hub.dispatch(&payload);
        }
        None => warn!("[gateway] Webhook received but no Evolution backend is configured"),
    }
    // Evolution expects a quick 200 regardless of what we did with the event.
    StatusCode::OK
}

// ── Router / Server ────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/connect", post(connect))
        .route("/status", get(status))
        .route("/sessions", get(sessions))
        .route("/send", post(send))
        .route("/logout", post(logout))
        .route(WEBHOOK_PATH, post(webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then close every session.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> EngineResult<()> {
    let manager = state.manager.clone();
    let addr = listener.local_addr()?;
    info!("[gateway] Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("[gateway] HTTP server stopped — closing sessions");
    manager.shutdown().await;
    Ok(())
}
