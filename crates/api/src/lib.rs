//! HTTP servers with observability for the storefront and fulfillment
//! services.
//!
//! The storefront exposes the purchase and invoice endpoints on top of the
//! order saga; the fulfillment service only exposes health and metrics next
//! to its queue consumer. Both use structured logging (tracing) and
//! Prometheus metrics.

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use broker::ConnectionManager;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use saga::{OrderPublisher, PendingOrderRegistry};
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use catalog::ProductCatalog;
use routes::orders::AppState;

/// Shared fulfillment state for the health endpoint.
pub struct FulfillmentState {
    pub broker: Arc<ConnectionManager>,
    pub store: Arc<dyn OrderStore>,
}

fn with_layers(router: Router) -> Router {
    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the storefront router with all routes and shared state.
pub fn create_storefront_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let router = Router::new()
        .route("/health", get(routes::health::storefront))
        .route("/buy", post(routes::orders::buy))
        .route("/invoice/{order_id}", get(routes::orders::invoice))
        .route("/orders/{order_id}", get(routes::orders::status))
        .with_state(state)
        .merge(routes::metrics::router(metrics_handle));
    with_layers(router)
}

/// Creates the fulfillment router.
pub fn create_fulfillment_app(
    state: Arc<FulfillmentState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let router = Router::new()
        .route("/health", get(routes::health::fulfillment))
        .with_state(state)
        .merge(routes::metrics::router(metrics_handle));
    with_layers(router)
}

/// Builds the storefront state around a fresh registry.
pub fn create_storefront_state(
    broker: Arc<ConnectionManager>,
    catalog: Arc<dyn ProductCatalog>,
    order_wait_timeout: Duration,
) -> Arc<AppState> {
    let registry = Arc::new(PendingOrderRegistry::new());
    Arc::new(AppState {
        publisher: OrderPublisher::new(broker.clone(), registry.clone()),
        registry,
        broker,
        catalog,
        order_wait_timeout,
    })
}

/// Periodically drops finished orders older than `retention` from the
/// registry.
pub fn spawn_registry_sweeper(
    registry: Arc<PendingOrderRegistry>,
    retention: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = registry.evict_finished_older_than(retention).await;
            if evicted > 0 {
                tracing::debug!(evicted, "evicted finished orders from registry");
            }
        }
    })
}

/// Installs the global tracing subscriber. `RUST_LOG` wins over
/// `default_filter`; `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
