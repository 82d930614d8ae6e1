use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::common::{created_response, success_response, CreatedResult, RejectRequest};
use crate::{
    auth::Actor,
    entities::return_request::{self, ReturnStatus},
    handlers::AppState,
    services::returns::NewReturnRequest,
    ApiResult,
};

#[derive(Debug, Deserialize)]
pub struct ListReturnsQuery {
    pub status: Option<ReturnStatus>,
}

pub fn return_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_return).get(list_returns))
        .route("/:id", get(get_return))
        .route("/:id/approve", post(approve_return))
        .route("/:id/reject", post(reject_return))
        .route("/:id/cancel", post(cancel_return))
}

pub async fn create_return(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<NewReturnRequest>,
) -> CreatedResult<return_request::Model> {
    Ok(created_response(
        state.services.returns.create(payload, &actor).await?,
    ))
}

pub async fn list_returns(
    State(state): State<AppState>,
    Query(query): Query<ListReturnsQuery>,
) -> ApiResult<Vec<return_request::Model>> {
    Ok(success_response(
        state.services.returns.list(query.status).await?,
    ))
}

pub async fn get_return(
    State(state): State<AppState>,
    Path(return_id): Path<Uuid>,
) -> ApiResult<return_request::Model> {
    Ok(success_response(state.services.returns.get(return_id).await?))
}

/// Approve a return and restore the quantity to its batch
pub async fn approve_return(
    State(state): State<AppState>,
    Path(return_id): Path<Uuid>,
    actor: Actor,
) -> ApiResult<return_request::Model> {
    Ok(success_response(
        state.services.returns.approve(return_id, &actor).await?,
    ))
}

pub async fn reject_return(
    State(state): State<AppState>,
    Path(return_id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<RejectRequest>,
) -> ApiResult<return_request::Model> {
    Ok(success_response(
        state
            .services
            .returns
            .reject(return_id, &actor, payload.reason)
            .await?,
    ))
}

pub async fn cancel_return(
    State(state): State<AppState>,
    Path(return_id): Path<Uuid>,
    actor: Actor,
) -> ApiResult<return_request::Model> {
    Ok(success_response(
        state.services.returns.cancel(return_id, &actor).await?,
    ))
}
