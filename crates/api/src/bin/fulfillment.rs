//! Fulfillment server entry point.

use std::error::Error;
use std::sync::Arc;

use api::FulfillmentState;
use api::config::FulfillmentConfig;
use broker::{AmqpTransport, ConnectionManager};
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use saga::FulfillmentConsumer;

async fn open_store(config: &FulfillmentConfig) -> Result<Arc<dyn OrderStore>, Box<dyn Error>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresOrderStore::connect(url).await?;
            store.run_migrations().await?;
            tracing::info!("connected to PostgreSQL order store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory only");
            Ok(Arc::new(InMemoryOrderStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = FulfillmentConfig::from_env();

    // 1. Initialize tracing
    api::init_tracing(&config.server.log_level);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Order store
    let store = open_store(&config).await?;

    // 4. Broker connection and order consumer
    let transport = Arc::new(AmqpTransport::new(config.broker.uri.clone()));
    let manager = Arc::new(ConnectionManager::new(transport, config.broker.clone()));

    if config.broker.disabled {
        tracing::warn!("broker consumer disabled, no orders will be fulfilled");
    } else {
        manager.spawn();
        FulfillmentConsumer::new(manager.clone(), store.clone())
            .with_redelivery_delay(config.redelivery_delay)
            .spawn();
    }

    // 5. Build the application and start the server
    let state = Arc::new(FulfillmentState {
        broker: manager,
        store,
    });
    let app = api::create_fulfillment_app(state, metrics_handle);
    let addr = config.server.addr();
    tracing::info!(%addr, "starting fulfillment server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(api::shutdown_signal())
        .await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}
