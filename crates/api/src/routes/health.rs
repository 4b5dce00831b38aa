//! Health check endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::FulfillmentState;
use crate::routes::orders::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_connected: Option<bool>,
}

impl HealthResponse {
    fn reply(self) -> (StatusCode, Json<Self>) {
        let code = if self.status == "ok" {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (code, Json(self))
    }
}

fn overall(checks: &[bool]) -> &'static str {
    if checks.iter().all(|ok| *ok) {
        "ok"
    } else {
        "degraded"
    }
}

/// GET /health — storefront broker and catalog reachability.
pub async fn storefront(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let broker_connected = state.broker.is_ready();
    let catalog_connected = state.catalog.ping().await;

    HealthResponse {
        status: overall(&[broker_connected, catalog_connected]),
        broker_connected,
        catalog_connected: Some(catalog_connected),
        store_connected: None,
    }
    .reply()
}

/// GET /health — fulfillment broker and order store reachability.
pub async fn fulfillment(
    State(state): State<Arc<FulfillmentState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let broker_connected = state.broker.is_ready();
    let store_connected = match state.store.ping().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "order store health check failed");
            false
        }
    };

    HealthResponse {
        status: overall(&[broker_connected, store_connected]),
        broker_connected,
        catalog_connected: None,
        store_connected: Some(store_connected),
    }
    .reply()
}
