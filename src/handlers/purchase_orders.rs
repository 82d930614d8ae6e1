use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::common::{created_response, success_response, CreatedResult};
use crate::{
    auth::Actor,
    entities::{
        grn,
        purchase_order::{self, PurchaseOrderStatus},
    },
    handlers::AppState,
    services::{
        grn::GrnDraft,
        purchase_orders::{NewPurchaseOrder, PurchaseOrderApproval, PurchaseOrderView},
    },
    ApiResult,
};

#[derive(Debug, Deserialize)]
pub struct ListPurchaseOrdersQuery {
    pub status: Option<PurchaseOrderStatus>,
}

pub fn purchase_order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_purchase_order).get(list_purchase_orders))
        .route("/:id", get(get_purchase_order))
        .route("/:id/submit", post(submit_purchase_order))
        .route("/:id/approve", post(approve_purchase_order))
        .route("/:id/cancel", post(cancel_purchase_order))
        .route("/:id/grn-draft", get(grn_draft_for_purchase_order))
        .route("/:id/grns", get(list_purchase_order_grns))
}

/// Create a purchase order
pub async fn create_purchase_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<NewPurchaseOrder>,
) -> CreatedResult<PurchaseOrderView> {
    let view = state
        .services
        .purchase_orders
        .create(payload, &actor)
        .await?;
    info!("Purchase order created: {}", view.order.po_number);
    Ok(created_response(view))
}

pub async fn list_purchase_orders(
    State(state): State<AppState>,
    Query(query): Query<ListPurchaseOrdersQuery>,
) -> ApiResult<Vec<purchase_order::Model>> {
    let orders = state.services.purchase_orders.list(query.status).await?;
    Ok(success_response(orders))
}

pub async fn get_purchase_order(
    State(state): State<AppState>,
    Path(po_id): Path<Uuid>,
) -> ApiResult<PurchaseOrderView> {
    Ok(success_response(
        state.services.purchase_orders.get(po_id).await?,
    ))
}

/// Submit a draft purchase order for approval
pub async fn submit_purchase_order(
    State(state): State<AppState>,
    Path(po_id): Path<Uuid>,
) -> ApiResult<purchase_order::Model> {
    Ok(success_response(
        state.services.purchase_orders.submit(po_id).await?,
    ))
}

/// Approve a purchase order (and its auto-GRN, when enabled)
pub async fn approve_purchase_order(
    State(state): State<AppState>,
    Path(po_id): Path<Uuid>,
    actor: Actor,
) -> ApiResult<PurchaseOrderApproval> {
    let approval = state
        .services
        .purchase_orders
        .approve(po_id, &actor)
        .await?;
    info!("Purchase order approved: {}", po_id);
    Ok(success_response(approval))
}

pub async fn cancel_purchase_order(
    State(state): State<AppState>,
    Path(po_id): Path<Uuid>,
    actor: Actor,
) -> ApiResult<purchase_order::Model> {
    Ok(success_response(
        state.services.purchase_orders.cancel(po_id, &actor).await?,
    ))
}

/// Draft receipt covering everything still outstanding on the order. Nothing is saved.
pub async fn grn_draft_for_purchase_order(
    State(state): State<AppState>,
    Path(po_id): Path<Uuid>,
) -> ApiResult<GrnDraft> {
    Ok(success_response(
        state.services.grn.draft_for_purchase_order(po_id).await?,
    ))
}

pub async fn list_purchase_order_grns(
    State(state): State<AppState>,
    Path(po_id): Path<Uuid>,
) -> ApiResult<Vec<grn::Model>> {
    Ok(success_response(
        state.services.grn.list_for_purchase_order(po_id).await?,
    ))
}
