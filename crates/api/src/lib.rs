//! HTTP API server and process wiring for the marketplace services.
//!
//! Hosts the saga coordinator behind REST endpoints and runs the consumers
//! the coordinator depends on: the ledger and inventory domain event
//! handlers and the response router on the payment topic. Structured
//! logging goes through tracing and counters through the Prometheus
//! recorder.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{InMemoryInventory, InMemoryLedger, PAYMENT_TOPIC};
use handlers::{DomainEventHandler, InventoryHandler, LedgerHandler};
use message_bus::{Checkpoint, CheckpointStore, CheckpointedConsumer, MessageBus};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryCatalog, RESPONSE_SCOPE, SagaConfig, SagaCoordinator};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
///
/// The ledger and inventory are the stores behind the domain event
/// handlers; routes read them for balances and listings and the deposit
/// endpoint writes the ledger directly. Sagas only reach them through the
/// bus.
pub struct AppState<B: MessageBus> {
    pub coordinator: Arc<SagaCoordinator<B, InMemoryCatalog>>,
    pub catalog: InMemoryCatalog,
    pub ledger: InMemoryLedger,
    pub inventory: InMemoryInventory,
    /// Cancelled on process shutdown; in-flight sagas run on child tokens.
    pub shutdown: CancellationToken,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<B: MessageBus + Clone + 'static>(
    state: Arc<AppState<B>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<B>))
        .route("/items", post(routes::items::register::<B>))
        .route("/items", get(routes::items::list::<B>))
        .route("/players/{id}/deposit", post(routes::players::deposit::<B>))
        .route("/players/{id}/balance", get(routes::players::balance::<B>))
        .route("/players/{id}/inventory", get(routes::players::inventory::<B>))
        .route("/players/{id}/buy", post(routes::payments::buy::<B>))
        .route("/players/{id}/sell", post(routes::payments::sell::<B>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state with in-memory stores and an
/// empty catalog.
pub fn create_default_state<B: MessageBus + Clone + 'static>(
    bus: B,
    config: SagaConfig,
    shutdown: CancellationToken,
) -> Arc<AppState<B>> {
    let catalog = InMemoryCatalog::new();
    let coordinator = SagaCoordinator::new(bus, catalog.clone(), config);

    Arc::new(AppState {
        coordinator: Arc::new(coordinator),
        catalog,
        ledger: InMemoryLedger::new(),
        inventory: InMemoryInventory::new(),
        shutdown,
    })
}

/// Join handles of the background consumers.
pub struct ConsumerTasks {
    pub ledger: JoinHandle<handlers::Result<Checkpoint>>,
    pub inventory: JoinHandle<handlers::Result<Checkpoint>>,
    pub responses: JoinHandle<message_bus::Result<Checkpoint>>,
}

impl ConsumerTasks {
    /// Waits for every consumer to stop and logs where each one ended.
    ///
    /// Returns `false` when any consumer failed instead of stopping cleanly.
    pub async fn join(self) -> bool {
        let results = [
            ("ledger", flatten(self.ledger.await)),
            ("inventory", flatten(self.inventory.await)),
            ("saga-responses", flatten(self.responses.await)),
        ];

        let mut clean = true;
        for (name, result) in results {
            match result {
                Ok(checkpoint) => tracing::info!(consumer = name, %checkpoint, "consumer stopped"),
                Err(error) => {
                    clean = false;
                    tracing::error!(consumer = name, %error, "consumer failed");
                }
            }
        }
        clean
    }
}

fn flatten<E: std::fmt::Display>(
    joined: Result<Result<Checkpoint, E>, tokio::task::JoinError>,
) -> Result<Checkpoint, String> {
    match joined {
        Ok(Ok(checkpoint)) => Ok(checkpoint),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Spawns the ledger handler, the inventory handler and the saga response
/// router, all stopping when `shutdown` is cancelled.
///
/// Each runs as a checkpointed consumer on `checkpoints`; the handlers use
/// their topic as scope and the router uses [`RESPONSE_SCOPE`].
pub fn spawn_consumers<B, C>(
    state: &AppState<B>,
    bus: B,
    checkpoints: C,
    shutdown: CancellationToken,
) -> ConsumerTasks
where
    B: MessageBus + Clone + 'static,
    C: CheckpointStore + Clone + 'static,
{
    let ledger = DomainEventHandler::new(
        bus.clone(),
        checkpoints.clone(),
        LedgerHandler::new(state.ledger.clone()),
    );
    let inventory = DomainEventHandler::new(
        bus.clone(),
        checkpoints.clone(),
        InventoryHandler::new(state.inventory.clone()),
    );
    let router = state.coordinator.response_router();
    let responses =
        CheckpointedConsumer::new(bus, checkpoints, PAYMENT_TOPIC).with_scope(RESPONSE_SCOPE);

    let ledger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { ledger.run(shutdown).await })
    };
    let inventory = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { inventory.run(shutdown).await })
    };
    let responses = tokio::spawn(async move { responses.run(&router, shutdown).await });

    ConsumerTasks {
        ledger,
        inventory,
        responses,
    }
}
