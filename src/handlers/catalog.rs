use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::{created_response, success_response, CreatedResult};
use crate::{
    entities::{
        product,
        supplier::{self, SupplierKind},
    },
    handlers::AppState,
    services::catalog::{NewProduct, NewSupplier},
    ApiResult,
};

#[derive(Debug, Deserialize)]
pub struct ListSuppliersQuery {
    pub kind: Option<SupplierKind>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SupplierActivation {
    pub is_active: bool,
}

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(register_product).get(list_products))
        .route("/:id", get(get_product))
}

pub fn supplier_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(register_supplier).get(list_suppliers))
        .route("/:id", get(get_supplier))
        .route("/:id/active", put(set_supplier_active))
}

pub async fn register_product(
    State(state): State<AppState>,
    Json(payload): Json<NewProduct>,
) -> CreatedResult<product::Model> {
    Ok(created_response(
        state.services.catalog.register_product(payload).await?,
    ))
}

pub async fn list_products(State(state): State<AppState>) -> ApiResult<Vec<product::Model>> {
    Ok(success_response(state.services.catalog.products().await?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<product::Model> {
    Ok(success_response(
        state.services.catalog.product(product_id).await?,
    ))
}

pub async fn register_supplier(
    State(state): State<AppState>,
    Json(payload): Json<NewSupplier>,
) -> CreatedResult<supplier::Model> {
    Ok(created_response(
        state.services.catalog.register_supplier(payload).await?,
    ))
}

pub async fn list_suppliers(
    State(state): State<AppState>,
    Query(query): Query<ListSuppliersQuery>,
) -> ApiResult<Vec<supplier::Model>> {
    Ok(success_response(
        state.services.catalog.suppliers(query.kind).await?,
    ))
}

pub async fn get_supplier(
    State(state): State<AppState>,
    Path(supplier_id): Path<Uuid>,
) -> ApiResult<supplier::Model> {
    Ok(success_response(
        state.services.catalog.supplier(supplier_id).await?,
    ))
}

pub async fn set_supplier_active(
    State(state): State<AppState>,
    Path(supplier_id): Path<Uuid>,
    Json(payload): Json<SupplierActivation>,
) -> ApiResult<supplier::Model> {
    Ok(success_response(
        state
            .services
            .catalog
            .set_supplier_active(supplier_id, payload.is_active)
            .await?,
    ))
}
