//! wabot - serve one WhatsApp Web session over HTTP.

mod config;

use clap::Parser;
use std::sync::Arc;
use thiserror::Error;
use wabot_core::client::bridge::BridgeFactory;
use wabot_core::{InitOutcome, SessionManager, SvgQrRenderer};
use wabot_http::HttpState;

use config::{Args, ConfigError};

#[derive(Error, Debug)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Server(String),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.default_log_filter()),
    )
    .init();

    if let Err(e) = run(args).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), DaemonError> {
    let settings = args.into_settings()?;
    log::info!(
        "Session storage: {}, bridge: {} {}",
        settings.storage.path().display(),
        settings.bridge.program,
        settings.bridge.args.join(" ")
    );

    let manager = SessionManager::builder(
        settings.storage,
        Arc::new(BridgeFactory::new(settings.bridge)),
    )
    .policy(settings.policy)
    .build();

    let mut state = HttpState::new(Arc::clone(&manager), Arc::new(SvgQrRenderer::new()));
    if let Some(token) = settings.auth_token {
        state = state.with_auth_token(token);
    }
    let mut server = wabot_http::start(Arc::new(state), &settings.host, settings.port)
        .await
        .map_err(DaemonError::Server)?;

    if let InitOutcome::Failed(e) = manager.initialize().await {
        log::warn!("Client did not start ({}), retry scheduled", e);
    }

    shutdown_signal().await;

    server.stop().await;
    manager.shutdown().await;
    log::info!("Stopped");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
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
                log::error!("Failed to listen for SIGTERM: {}", e);
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
    log::info!("Shutdown signal received");
}
