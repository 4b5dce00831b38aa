//! Storefront server entry point.

use std::error::Error;
use std::sync::Arc;

use api::catalog::{InMemoryProductCatalog, ProductCatalog};
use api::config::StorefrontConfig;
use broker::{AmqpTransport, ConnectionManager};
use saga::CompletionConsumer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = StorefrontConfig::from_env();

    // 1. Initialize tracing
    api::init_tracing(&config.server.log_level);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Load the product catalog
    let catalog = match &config.catalog_file {
        Some(path) => {
            let catalog = InMemoryProductCatalog::from_file(path)?;
            tracing::info!(path = %path.display(), products = catalog.len(), "loaded product catalog");
            catalog
        }
        None => {
            tracing::warn!("CATALOG_FILE not set, starting with an empty catalog");
            InMemoryProductCatalog::default()
        }
    };
    let catalog: Arc<dyn ProductCatalog> = Arc::new(catalog);

    // 4. Broker connection, saga state and completion consumer
    let transport = Arc::new(AmqpTransport::new(config.broker.uri.clone()));
    let manager = Arc::new(ConnectionManager::new(transport, config.broker.clone()));
    let state = api::create_storefront_state(manager.clone(), catalog, config.order_wait_timeout);

    if config.broker.disabled {
        tracing::warn!("broker consumer disabled, purchases will fail");
    } else {
        manager.spawn();
        CompletionConsumer::new(state.registry.clone()).spawn(manager.clone());
    }
    api::spawn_registry_sweeper(
        state.registry.clone(),
        config.registry_retention,
        config.sweep_interval(),
    );

    // 5. Build the application and start the server
    let app = api::create_storefront_app(state, metrics_handle);
    let addr = config.server.addr();
    tracing::info!(%addr, "starting storefront server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(api::shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}
