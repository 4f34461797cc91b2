//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use message_bus::{
    CheckpointStore, InMemoryCheckpointStore, InMemoryMessageBus, PostgresCheckpointStore,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Checkpoints survive restarts only with a database
    let checkpoints: Arc<dyn CheckpointStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("using PostgreSQL checkpoint store");
            Arc::new(
                PostgresCheckpointStore::connect(url)
                    .await
                    .expect("failed to connect checkpoint store"),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, checkpoints are kept in memory");
            Arc::new(InMemoryCheckpointStore::new())
        }
    };

    // 4. Create the bus, application state and background consumers
    let shutdown = CancellationToken::new();
    let consumers_shutdown = CancellationToken::new();
    let bus = InMemoryMessageBus::new();
    let state = api::create_default_state(bus.clone(), config.saga_config(), shutdown.clone());
    let consumers = api::spawn_consumers(&state, bus, checkpoints, consumers_shutdown.clone());

    // 5. Build the application
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_shutdown.cancel();
        })
        .await
        .expect("server error");

    // 7. Stop consumers once cancelled sagas have published their compensations
    consumers_shutdown.cancel();
    if !consumers.join().await {
        tracing::error!("a consumer stopped with an error");
        std::process::exit(1);
    }

    tracing::info!("server shut down gracefully");
}
