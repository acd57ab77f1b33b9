mod archive;
mod config;
mod error;
mod gdrive;
mod handlers;
mod remote;
mod scheduler;
mod token_manager;

use std::sync::Arc;

use axum::Router;
use clap::Parser;
use drive_changelog_core::{CycleOptions, EventLog, SyncOrchestrator};
use drive_changelog_local::LocalState;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use archive::DriveArchiveSink;
use config::Config;
use gdrive::GDriveClient;
use handlers::AppState;
use remote::DriveRemoteStore;
use token_manager::{Credentials, TokenManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }

    let config = Config::parse();
    config.validate()?;

    info!("Starting drive-changelog v{}", env!("CARGO_PKG_VERSION"));
    info!("  State dir: {}", config.state_dir.display());
    info!("  Poll interval: {} secs", config.poll_interval);
    info!("  Max pages per cycle: {}", config.max_pages_per_cycle);

    // Lock the state directory before anything touches it
    let state = LocalState::open(&config.state_dir).await?;
    info!("  Changelog: {}", state.log.path().display());

    // Token manager (refreshes via Google OAuth2)
    let credentials = Credentials::from_file(&config.credentials)?;
    info!("  Credentials: {}", credentials.kind());
    let token_manager = Arc::new(TokenManager::new(credentials, config.request_timeout())?);

    // Google Drive API client (stateless, tokens provided per-call)
    let gdrive_client = Arc::new(
        GDriveClient::new(config.request_timeout())?
            .with_base_urls(&config.drive_api_url, &config.drive_upload_url),
    );

    let shutdown_rx = create_shutdown_signal();

    let remote = Arc::new(DriveRemoteStore::new(
        gdrive_client.clone(),
        token_manager.clone(),
    ));
    let mut orchestrator = SyncOrchestrator::new(remote, state.cursors.clone(), state.log.clone())
        .with_options(CycleOptions {
            max_pages_per_cycle: config.max_pages_per_cycle as usize,
            publish_timeout: config.publish_timeout(),
        })
        .with_shutdown(shutdown_rx.clone());

    match config.folder_id.as_deref().map(str::trim) {
        Some(folder_id) if config.upload_enabled => {
            info!(
                "  Upload: {:?} into '{}' under folder {}",
                config.publish_mode, config.archive_folder_name, folder_id
            );
            orchestrator = orchestrator.with_archive(Arc::new(DriveArchiveSink::new(
                gdrive_client,
                token_manager,
                folder_id.to_string(),
                config.archive_folder_name.clone(),
                config.publish_mode,
            )));
        }
        _ => warn!("  Upload: DISABLED (changelog kept locally only)"),
    }

    let orchestrator = Arc::new(orchestrator);
    if let Some(cursor) = orchestrator.restore().await? {
        info!("  Resuming from cursor {}", cursor);
    }

    // Background polling (first cycle runs immediately)
    let scheduler_handle = scheduler::spawn(
        orchestrator.clone(),
        config.poll_interval(),
        shutdown_rx.clone(),
    );

    // Build router
    let app: Router = handlers::router(AppState { orchestrator }).layer(TraceLayer::new_for_http());

    // Bind and serve
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|&v| v).await;
        })
        .await?;

    if let Err(e) = scheduler_handle.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }

    drop(state);
    info!("Server shutdown complete");
    Ok(())
}

/// Create a shutdown signal that triggers on Ctrl+C or SIGTERM.
fn create_shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
            info!("Received Ctrl+C, initiating shutdown");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
            info!("Received SIGTERM, initiating shutdown");
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}
