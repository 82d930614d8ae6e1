use axum::{
    extract::{Path, State},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::success_response;
use crate::{
    auth::{ensure_permitted, permissions, Actor},
    entities::{inventory_transaction, stock_batch},
    handlers::AppState,
    services::stock_ledger::StockLevel,
    ApiResult,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpirySweepResult {
    pub expired: u64,
}

pub fn stock_routes() -> Router<AppState> {
    Router::new()
        .route("/expire", post(expire_batches))
        .route("/:product_id", get(get_stock_level))
        .route("/:product_id/batches", get(list_batches))
        .route("/:product_id/transactions", get(list_transactions))
}

/// Current balance and stock status of a product
pub async fn get_stock_level(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<StockLevel> {
    Ok(success_response(
        state.services.stock_ledger.stock_status(product_id).await?,
    ))
}

pub async fn list_batches(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Vec<stock_batch::Model>> {
    Ok(success_response(
        state.services.stock_ledger.batches(product_id).await?,
    ))
}

/// Audit trail of a product, newest first
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Vec<inventory_transaction::Model>> {
    Ok(success_response(
        state.services.stock_ledger.transactions(product_id).await?,
    ))
}

/// Marks every batch past its expiry date as expired
pub async fn expire_batches(
    State(state): State<AppState>,
    actor: Actor,
) -> ApiResult<ExpirySweepResult> {
    ensure_permitted(
        state.services.authorizer.as_ref(),
        &actor,
        permissions::INVENTORY_ADJUST,
    )
    .await?;
    let expired = state
        .services
        .stock_ledger
        .expire_batches(Utc::now().date_naive())
        .await?;
    Ok(success_response(ExpirySweepResult { expired }))
}
