// ── Gateway Atoms: Constants ───────────────────────────────────────────────
// All named constants for the crate live here.

// ── HTTP surface ──────────────────────────────────────────────────────────
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const WEBHOOK_PATH: &str = "/webhook/whatsapp";
pub const HEALTH_TEXT: &str = "WhatsApp gateway is online";

// ── Credential store ──────────────────────────────────────────────────────
/// Root directory holding one sub-directory per session id.
pub const DEFAULT_AUTH_DIR: &str = "auth_info";
pub const CREDENTIALS_FILE: &str = "creds.json";

// ── Addressing ────────────────────────────────────────────────────────────
/// Domain appended to a normalized phone number to form a routable JID.
pub const DEFAULT_JID_SUFFIX: &str = "s.whatsapp.net";

// ── Reconnection ──────────────────────────────────────────────────────────
/// Delay before the first reconnection attempt after a transient close.
pub const RECONNECT_BASE_SECS: u64 = 5;
/// Backoff ceiling for consecutive failed reconnections (5 minutes).
pub const RECONNECT_MAX_SECS: u64 = 300;
/// Exponent cap so `2^attempt` never overflows.
pub const RECONNECT_MAX_EXPONENT: u32 = 12;

// ── Disconnect classification ─────────────────────────────────────────────
/// Close status reported when the phone revoked the linked device
/// (Baileys `DisconnectReason.loggedOut`).
pub const LOGGED_OUT_STATUS: u16 = 401;

// ── Outcome messages ──────────────────────────────────────────────────────
pub const PAIRING_REQUIRED_MESSAGE: &str =
    "Session is not connected. Scan the QR code to pair this number, then retry.";

// ── Evolution API backend ─────────────────────────────────────────────────
pub const DEFAULT_EVOLUTION_URL: &str = "http://127.0.0.1:8085";
pub const DEFAULT_INSTANCE_PREFIX: &str = "wa";
