// wa-gateway — process entry point
// CLI parsing, logging, wiring, graceful shutdown.

use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use wa_gateway::engine::server::{self, AppState};
use wa_gateway::engine::whatsapp::{
    EvolutionClientFactory, FileCredentialStore, GatewayConfig, LifecycleOptions, SendCoordinator,
    SessionManager, SessionRegistry, WebhookHub,
};
use wa_gateway::EngineResult;

#[derive(Debug, Parser)]
#[command(name = "wa-gateway", version, about = "Multi-session WhatsApp gateway")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, short, env = "WA_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the listen port (takes precedence over PORT).
    #[arg(long, short)]
    port: Option<u16>,

    /// Override the credential root directory.
    #[arg(long)]
    auth_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()).await {
        error!("[gateway] Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> EngineResult<()> {
    let mut config = GatewayConfig::load(cli.config.as_deref())?;
    config.apply_env()?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(auth_dir) = cli.auth_dir {
        config.auth_dir = auth_dir;
    }
    config.validate()?;

    if config.evolution.api_key.is_empty() {
        warn!("[gateway] evolution.api_key is empty — Evolution API calls will be rejected");
    }

    let hub = WebhookHub::new();
    let factory = EvolutionClientFactory::new(config.evolution.clone(), config.webhook_url(), hub.clone())?;
    let store = FileCredentialStore::new(&config.auth_dir);
    info!("[gateway] Credentials stored under {}", store.root().display());

    let manager = SessionManager::new(
        SessionRegistry::new(),
        Arc::new(store),
        Arc::new(factory),
        LifecycleOptions::from(&config),
    );
    let sender = SendCoordinator::new(manager.clone())
        .with_jid_suffix(config.jid_suffix.clone())
        .with_retries(config.send_retries);
    let state = AppState::new(manager, sender, Some(hub));

    let addr = config.listen_address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;

    server::serve(listener, state, shutdown_signal()).await
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[gateway] Ctrl-C handler failed: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("[gateway] SIGTERM handler failed: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("[gateway] Shutdown signal received");
}
