use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use super::common::{created_response, success_response, CreatedResult};
use crate::{
    auth::Actor,
    entities::outward_entry,
    handlers::AppState,
    services::outward::{NewOutwardEntry, NewOutwardItem, OutwardView},
    ApiResult,
};

pub fn outward_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(draft_outward))
        .route("/:id", get(get_outward))
        .route("/:id/items", put(replace_outward_items))
        .route("/:id/submit", post(submit_outward))
        .route("/:id/approve", post(approve_outward))
        .route("/:id/cancel", post(cancel_outward))
}

pub async fn draft_outward(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<NewOutwardEntry>,
) -> CreatedResult<OutwardView> {
    Ok(created_response(
        state.services.outward.draft(payload, &actor).await?,
    ))
}

pub async fn get_outward(
    State(state): State<AppState>,
    Path(outward_id): Path<Uuid>,
) -> ApiResult<OutwardView> {
    Ok(success_response(state.services.outward.get(outward_id).await?))
}

pub async fn replace_outward_items(
    State(state): State<AppState>,
    Path(outward_id): Path<Uuid>,
    actor: Actor,
    Json(items): Json<Vec<NewOutwardItem>>,
) -> ApiResult<OutwardView> {
    Ok(success_response(
        state
            .services
            .outward
            .replace_items(outward_id, items, &actor)
            .await?,
    ))
}

pub async fn submit_outward(
    State(state): State<AppState>,
    Path(outward_id): Path<Uuid>,
) -> ApiResult<outward_entry::Model> {
    Ok(success_response(
        state.services.outward.submit(outward_id).await?,
    ))
}

/// Approve and issue: debits every item from its batch
pub async fn approve_outward(
    State(state): State<AppState>,
    Path(outward_id): Path<Uuid>,
    actor: Actor,
) -> ApiResult<OutwardView> {
    Ok(success_response(
        state.services.outward.approve(outward_id, &actor).await?,
    ))
}

pub async fn cancel_outward(
    State(state): State<AppState>,
    Path(outward_id): Path<Uuid>,
    actor: Actor,
) -> ApiResult<outward_entry::Model> {
    Ok(success_response(
        state.services.outward.cancel(outward_id, &actor).await?,
    ))
}
