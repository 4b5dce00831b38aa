//! Purchase and invoice endpoints of the storefront.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use broker::ConnectionManager;
use common::{OrderId, ProductRef};
use saga::{Invoice, OrderPublisher, OrderStatus, PendingOrder, PendingOrderRegistry};
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::catalog::ProductCatalog;
use crate::error::ApiError;

/// Shared storefront state accessible from all handlers.
pub struct AppState {
    pub publisher: OrderPublisher,
    pub registry: Arc<PendingOrderRegistry>,
    pub broker: Arc<ConnectionManager>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub order_wait_timeout: Duration,
}

// -- Request types --

#[derive(Deserialize)]
pub struct BuyRequest {
    #[serde(default)]
    pub ids: Vec<String>,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub products: Vec<ProductRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_price: Option<f64>,
}

impl From<PendingOrder> for OrderResponse {
    fn from(entry: PendingOrder) -> Self {
        Self {
            order_id: entry.order_id,
            status: entry.status,
            user: entry.user().map(str::to_string),
            total_price: entry.total_price(),
            username: entry.username,
            products: entry.products,
        }
    }
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(raw).map_err(|_| ApiError::NotFound(format!("Order not found: {raw}")))
}

// -- Handlers --

/// POST /buy — place an order and wait for the fulfillment service to
/// confirm it.
#[tracing::instrument(skip(state, user, body), fields(username = %user.0))]
pub async fn buy(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    body: Result<Json<BuyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if req.ids.is_empty() {
        return Err(ApiError::BadRequest("ids must not be empty".to_string()));
    }

    let products = state
        .catalog
        .find_by_ids(&req.ids)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if products.is_empty() {
        return Err(ApiError::BadRequest(
            "none of the requested products exist".to_string(),
        ));
    }

    let order_id = state.publisher.submit_order(&user.0, products).await?;
    let order = state
        .registry
        .await_completion(order_id, state.order_wait_timeout)
        .await?;

    tracing::info!(%order_id, total_price = ?order.total_price(), "order fulfilled");
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /invoice/{order_id} — invoice of a completed order.
#[tracing::instrument(skip(state, _user))]
pub async fn invoice(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Path(order_id): Path<String>,
) -> Result<Json<Invoice>, ApiError> {
    let order_id = parse_order_id(&order_id)?;
    let invoice = state.registry.get_invoice(order_id).await?;
    Ok(Json(invoice))
}

/// GET /orders/{order_id} — current saga status of an order.
#[tracing::instrument(skip(state))]
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&order_id)?;
    let entry = state.registry.get_status(order_id).await?;
    Ok(Json(entry.into()))
}
