// WhatsApp Gateway — Configuration
// GatewayConfig, EvolutionConfig, load/apply_env, derived policies

use crate::atoms::constants::{
    DEFAULT_AUTH_DIR, DEFAULT_BIND_ADDRESS, DEFAULT_EVOLUTION_URL, DEFAULT_INSTANCE_PREFIX,
    DEFAULT_JID_SUFFIX, DEFAULT_PORT, LOGGED_OUT_STATUS, RECONNECT_BASE_SECS, RECONNECT_MAX_SECS,
    WEBHOOK_PATH,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::http::ReconnectPolicy;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Config Structs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP API binds to.
    pub bind_address: String,
    pub port: u16,
    /// Root directory for per-session credential directories.
    pub auth_dir: PathBuf,
    /// Delay before the first reconnection after a transient close.
    pub reconnect_base_secs: u64,
    /// Backoff ceiling for consecutive failed reconnections.
    pub reconnect_max_secs: u64,
    /// Close status codes treated as an explicit logout (terminal).
    pub logout_status_codes: Vec<u16>,
    /// Extra dispatch attempts before a failed send invalidates the session.
    /// 0 keeps the invalidate-on-first-failure behaviour.
    pub send_retries: u32,
    /// Domain appended to normalized phone numbers.
    pub jid_suffix: String,
    pub evolution: EvolutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Evolution API base URL.
    pub api_url: String,
    /// Global Evolution API key (sent as the `apikey` header).
    pub api_key: String,
    /// Instance names are `{prefix}-{session id}`.
    pub instance_prefix: String,
    /// URL Evolution posts events to. Derived from bind address + port when unset.
    pub webhook_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            bind_address: DEFAULT_BIND_ADDRESS.into(),
            port: DEFAULT_PORT,
            auth_dir: PathBuf::from(DEFAULT_AUTH_DIR),
            reconnect_base_secs: RECONNECT_BASE_SECS,
            reconnect_max_secs: RECONNECT_MAX_SECS,
            logout_status_codes: vec![LOGGED_OUT_STATUS],
            send_retries: 0,
            jid_suffix: DEFAULT_JID_SUFFIX.into(),
            evolution: EvolutionConfig::default(),
        }
    }
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        EvolutionConfig {
            api_url: DEFAULT_EVOLUTION_URL.into(),
            api_key: String::new(),
            instance_prefix: DEFAULT_INSTANCE_PREFIX.into(),
            webhook_url: None,
        }
    }
}

// ── Loading ────────────────────────────────────────────────────────────

impl GatewayConfig {
    /// Load from a TOML file. A missing `path` yields the defaults.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)?;
        info!("[gateway] Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> EngineResult<Self> {
        let config: GatewayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PORT`, `EVOLUTION_API_URL` and `EVOLUTION_API_KEY` overrides.
    pub fn apply_env(&mut self) -> EngineResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> EngineResult<()> {
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| EngineError::Config(format!("PORT is not a valid port: {port:?}")))?;
        }
        if let Some(url) = lookup("EVOLUTION_API_URL") {
            self.evolution.api_url = url;
        }
        if let Some(key) = lookup("EVOLUTION_API_KEY") {
            self.evolution.api_key = key;
        }
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.jid_suffix.trim().is_empty() {
            return Err(EngineError::Config("jid_suffix must not be empty".into()));
        }
        if self.reconnect_base_secs == 0 {
            return Err(EngineError::Config("reconnect_base_secs must be at least 1".into()));
        }
        if self.auth_dir.as_os_str().is_empty() {
            return Err(EngineError::Config("auth_dir must not be empty".into()));
        }
        Ok(())
    }

    // ── Derived values ─────────────────────────────────────────────────

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_secs(self.reconnect_base_secs),
            Duration::from_secs(self.reconnect_max_secs),
        )
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Webhook URL handed to Evolution when instances are created.
    pub fn webhook_url(&self) -> String {
        if let Some(url) = &self.evolution.webhook_url {
            return url.clone();
        }
        let host = match self.bind_address.as_str() {
            "0.0.0.0" | "::" | "" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}{}", host, self.port, WEBHOOK_PATH)
    }
}
