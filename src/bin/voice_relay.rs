//! Voice relay server binary.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voice_relay::{RelayConfig, SessionRegistry, server};

/// How often the active call count is logged.
const ACTIVITY_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Voice relay: bridges call transcripts to an LLM and streams back speakable replies.
#[derive(Parser)]
#[command(name = "voice-relay", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port (overrides config and PORT).
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voice_relay=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = RelayConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
        config.validate()?;
    }
    info!(
        base_url = %config.llm.base_url,
        model = %config.llm.model,
        backend = ?config.llm.backend,
        flavor = ?config.llm.api_flavor,
        "configuration loaded"
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let registry = Arc::new(SessionRegistry::from_config(
        config.session.clone(),
        config.llm.clone(),
    ));

    let cancel = CancellationToken::new();
    let activity = tokio::spawn(log_activity(Arc::clone(&registry), cancel.clone()));

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    };
    server::serve(listener, registry, shutdown).await?;

    cancel.cancel();
    let _ = activity.await;
    Ok(())
}

/// Log the number of live calls while any are active.
async fn log_activity(registry: Arc<SessionRegistry>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ACTIVITY_LOG_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let active = registry.count();
                if active > 0 {
                    info!(active, "active calls");
                }
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
