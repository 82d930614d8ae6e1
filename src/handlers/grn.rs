use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::common::{created_response, success_response, CreatedResult, RejectRequest, RemarksRequest};
use crate::{
    auth::Actor,
    entities::grn,
    handlers::AppState,
    services::grn::{update_item, GrnDraft, GrnView, ItemUpdate, SubmitMode},
    ApiResult,
};

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitGrnRequest {
    #[serde(flatten)]
    pub draft: GrnDraft,
    #[serde(default)]
    pub mode: SubmitMode,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateDraftItemRequest {
    pub draft: GrnDraft,
    pub index: usize,
    pub update: ItemUpdate,
}

pub fn grn_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_grn))
        .route("/drafts/update-item", post(update_draft_item))
        .route("/:id", get(get_grn))
        .route("/:id/approve", post(approve_grn))
        .route("/:id/quality-check", post(hold_grn_for_quality_check))
        .route("/:id/reject", post(reject_grn))
        .route("/:id/partial-accept", post(partially_accept_grn))
}

/// Persist a GRN draft, optionally approving it in the same step
pub async fn submit_grn(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<SubmitGrnRequest>,
) -> CreatedResult<GrnView> {
    let view = state
        .services
        .grn
        .submit(payload.draft, &actor, payload.mode)
        .await?;
    info!("GRN submitted: {} ({})", view.grn.grn_number, view.grn.status);
    Ok(created_response(view))
}

/// Apply one field edit to an unsaved draft and return the re-derived draft
pub async fn update_draft_item(
    Json(payload): Json<UpdateDraftItemRequest>,
) -> ApiResult<GrnDraft> {
    let mut draft = payload.draft;
    update_item(&mut draft, payload.index, payload.update)?;
    Ok(success_response(draft))
}

pub async fn get_grn(State(state): State<AppState>, Path(grn_id): Path<Uuid>) -> ApiResult<GrnView> {
    Ok(success_response(state.services.grn.get(grn_id).await?))
}

/// Approve a GRN and credit accepted quantities to stock
pub async fn approve_grn(
    State(state): State<AppState>,
    Path(grn_id): Path<Uuid>,
    actor: Actor,
    payload: Option<Json<RemarksRequest>>,
) -> ApiResult<GrnView> {
    let remarks = payload.and_then(|Json(body)| body.remarks);
    let view = state.services.grn.approve(grn_id, &actor, remarks).await?;
    Ok(success_response(view))
}

pub async fn hold_grn_for_quality_check(
    State(state): State<AppState>,
    Path(grn_id): Path<Uuid>,
    actor: Actor,
) -> ApiResult<grn::Model> {
    Ok(success_response(
        state
            .services
            .grn
            .hold_for_quality_check(grn_id, &actor)
            .await?,
    ))
}

pub async fn reject_grn(
    State(state): State<AppState>,
    Path(grn_id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<RejectRequest>,
) -> ApiResult<grn::Model> {
    Ok(success_response(
        state
            .services
            .grn
            .reject(grn_id, &actor, payload.reason)
            .await?,
    ))
}

pub async fn partially_accept_grn(
    State(state): State<AppState>,
    Path(grn_id): Path<Uuid>,
    actor: Actor,
    payload: Option<Json<RemarksRequest>>,
) -> ApiResult<grn::Model> {
    let remarks = payload.and_then(|Json(body)| body.remarks);
    Ok(success_response(
        state
            .services
            .grn
            .mark_partially_accepted(grn_id, &actor, remarks)
            .await?,
    ))
}
