// WhatsApp Gateway — Session Engine
//
// Module layout:
//   config        — GatewayConfig, EvolutionConfig, load/apply_env
//   credentials   — CredentialBlob, CredentialStore, FileCredentialStore
//   client        — ConnectionClient / ClientFactory traits, ClientEvent, classify_disconnect
//   registry      — SessionRecord, SessionRegistry
//   lifecycle     — SessionManager (initialize, event handling, reconnect, logout, shutdown)
//   send          — SendCoordinator, normalize_destination
//   status        — StatusAccessor
//   evolution_api — Evolution API backed ConnectionClient
//   webhook       — WebhookHub, parse_webhook_event

pub mod client;
pub mod config;
pub mod credentials;
pub mod evolution_api;
pub mod lifecycle;
pub mod registry;
pub mod send;
pub mod status;
pub mod webhook;

// ── Re-exports ─────────────────────────────────────────────────────────

pub use client::{
    classify_disconnect, ClientConnection, ClientEvent, ClientFactory, ConnectionClient,
    ConnectionUpdate, DisconnectKind, EventReceiver, EventSender,
};
pub use config::{EvolutionConfig, GatewayConfig};
pub use credentials::{CredentialBlob, CredentialStore, FileCredentialStore};
pub use evolution_api::{EvolutionClientFactory, EvolutionCredentials};
pub use lifecycle::{LifecycleOptions, SessionManager};
pub use registry::SessionRegistry;
pub use send::{normalize_destination, SendCoordinator};
pub use status::StatusAccessor;
pub use webhook::WebhookHub;
