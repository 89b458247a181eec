//! Call Controller
//!
//! WebSocket signaling server for group call invitations and media rooms.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Build shared services (session store, media engine, presence)
//! 4. Spawn the actor system (`CallControllerHandle`)
//! 5. Serve `/ws`, `/api/meetings`, `/health`, `/ready` and `/metrics`
//! 6. Wait for shutdown signal, then drain meeting actors

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use call_controller::actors::{CallControllerHandle, CallServices};
use call_controller::api::ApiState;
use call_controller::config::Config;
use call_controller::media::LocalMediaEngine;
use call_controller::observability::{init_metrics_recorder, HealthState};
use call_controller::presence::PresenceDirectory;
use call_controller::routes::{build_routes, AppState};
use call_controller::signaling::{EventRouter, SignalingState};
use call_controller::store::InMemorySessionStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long meeting actors get to stop on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Call Controller");
    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        invitation_window_secs = config.invitation_window.as_secs(),
        client_channel_buffer = config.client_channel_buffer,
        rtc_min_port = config.media.rtc_min_port,
        rtc_max_port = config.media.rtc_max_port,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new(config.instance_id.clone()));

    let store = Arc::new(InMemorySessionStore::new());
    let presence = PresenceDirectory::new();
    let services = CallServices::new(
        store.clone(),
        Arc::new(LocalMediaEngine::new(config.media.clone())),
        presence.clone(),
        config.invitation_window,
    );

    let controller = CallControllerHandle::new(config.instance_id.clone(), services);
    info!("Actor system initialized");

    let app = build_routes(
        AppState {
            signaling: SignalingState {
                router: EventRouter::new(controller.clone(), presence),
                client_channel_buffer: config.client_channel_buffer,
            },
            api: ApiState { store },
            health: Arc::clone(&health_state),
        },
        prometheus_handle,
    );

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    // Bind before reporting ready so bind errors fail startup
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind server");
        format!("Failed to bind server to {addr}: {e}")
    })?;
    info!(addr = %addr, "Server bound successfully");

    let shutdown_token = CancellationToken::new();
    let server_token = shutdown_token.clone();
    let server = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!("Call Controller running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();

    if let Err(e) = controller.shutdown(SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Actor system shutdown error");
    }
    shutdown_token.cancel();

    if tokio::time::timeout(Duration::from_secs(5), server).await.is_err() {
        warn!("HTTP server did not stop in time");
    }

    info!("Call Controller shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
