use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use codearena_api::backends::Backends;
use codearena_api::config::ServerConfig;
use codearena_api::intake::SubmissionIntake;
use codearena_api::reader::StatusReader;
use codearena_api::relay::StatusRelay;
use codearena_api::router::build_app_router;
use codearena_api::state::AppState;
use codearena_api::ws;
use codearena_cache::RateLimiter;
use codearena_core::{Clock, SystemClock};
use codearena_events::StatusChannel;
use codearena_queue::RetentionSweeper;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codearena_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // --- Backends ---
    let backends = Backends::connect(&config, Arc::clone(&clock))
        .await
        .expect("Failed to connect backends");

    if let Some(pool) = &backends.pool {
        codearena_db::health_check(pool)
            .await
            .expect("Database health check failed");
        codearena_db::run_migrations(pool)
            .await
            .expect("Failed to run database migrations");
        tracing::info!("Database migrations applied");
    }

    let channel = StatusChannel::new(Arc::clone(&backends.topic), config.status_channel.clone());
    let cancel = CancellationToken::new();

    // --- WebSocket manager + heartbeat ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager), cancel.clone());

    // --- Status relay ---
    let relay = StatusRelay::new(
        channel.clone(),
        Arc::clone(&ws_manager),
        Arc::clone(&backends.cache),
        config.result_cache_ttl,
    );
    let relay_handle = relay
        .start(cancel.clone())
        .await
        .expect("Failed to subscribe to the status channel");

    // --- Queue retention ---
    let sweeper = RetentionSweeper::new(
        Arc::clone(&backends.queue),
        config.retention_sweep_interval,
    );
    let sweeper_cancel = cancel.clone();
    let sweeper_handle = tokio::spawn(async move { sweeper.run(sweeper_cancel).await });

    tracing::info!("Background services started (heartbeat, status relay, retention sweeper)");

    // --- App state ---
    let limiter = Arc::new(RateLimiter::new(
        Arc::clone(&backends.counters),
        config.rate_limit,
        Arc::clone(&clock),
    ));
    let intake = SubmissionIntake::new(
        limiter,
        Arc::clone(&backends.store),
        Arc::clone(&backends.queue),
        channel,
        clock,
    );
    let reader = StatusReader::new(
        Arc::clone(&backends.store),
        Arc::clone(&backends.cache),
        config.result_cache_ttl,
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
        intake: Arc::new(intake),
        reader: Arc::new(reader),
        queue: Arc::clone(&backends.queue),
        pool: backends.pool.clone(),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), relay_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), heartbeat_handle).await;
    tracing::info!("Background services stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
