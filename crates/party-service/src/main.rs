//! Party Service
//!
//! Server-authoritative party coordination.
//!
//! # Servers
//!
//! - HTTP server for health endpoints and Prometheus metrics (default: 0.0.0.0:8082)
//!
//! Client connections are owned by the transport layer, which drives parties
//! through `PartyActorHandle` (connect/disconnect callbacks, client requests)
//! and drains generic invitation requests.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Build the invitation backends
//! 4. Initialize actor system (`PartyRegistryActorHandle`)
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use party_service::actors::{ActorMetrics, PartyRegistryActorHandle};
use party_service::config::Config;
use party_service::invitations::{GenericInvitationBackend, InvitationManager, InvitationRequest};
use party_service::observability::{health_router, init_metrics_recorder, HealthState};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Buffer of the generic invitation backend.
const GENERIC_INVITATION_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "party_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Party Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        service_id = %config.service_id,
        health_bind_address = %config.health_bind_address,
        max_parties = config.max_parties,
        default_max_members = config.party.default_max_members,
        require_client_ack = config.party.ack.require_ack,
        client_ack_timeout_seconds = config.party.ack.timeout.as_secs(),
        reservation_ttl_seconds = config.party.reservation_ttl.as_secs(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    // Platform backends register here; the generic backend is the fallback
    let (generic_backend, generic_requests) =
        GenericInvitationBackend::channel(GENERIC_INVITATION_BUFFER);
    let invitations = InvitationManager::new(Arc::new(generic_backend), Vec::new());

    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let registry_handle = PartyRegistryActorHandle::new(&config, invitations, actor_metrics);
    info!("Actor system initialized");

    // Child of the registry's token: cancelled when the registry shuts down
    let shutdown_token = registry_handle.child_token();

    let invitation_token = shutdown_token.child_token();
    tokio::spawn(async move {
        run_generic_invitations(generic_requests, invitation_token).await;
    });

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let health_router = health_router(Arc::clone(&health_state));

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = health_router
        .merge(metrics_router)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    health_state.set_ready();

    info!("Party Service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();

    shutdown_token.cancel();

    // Disband every party (also cancels via the registry's token)
    if let Err(e) = registry_handle.shutdown(Duration::from_secs(30)).await {
        warn!(error = %e, "Actor system shutdown error");
    }

    info!("Party Service shutdown complete");
    Ok(())
}

/// Drain the generic invitation backend.
///
/// No client transport is attached to this binary, so requests are dropped
/// and resolve as `RecipientUnreachable`. A transport forwards them to the
/// recipient's session instead.
async fn run_generic_invitations(
    mut requests: mpsc::Receiver<InvitationRequest>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "party.invitations", "Generic invitation task stopping");
                break;
            }
            request = requests.recv() => {
                let Some(request) = request else {
                    break;
                };
                warn!(
                    target: "party.invitations",
                    party_id = %request.party_id,
                    sender = %request.sender,
                    recipient = %request.recipient,
                    "No transport for generic invitation, dropping"
                );
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
