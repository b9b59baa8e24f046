//! Stream administration and presence endpoints

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use streamlite_core::models::{
    CreateLivestreamRequest, CreateLivestreamResponse, LivestreamDetail, LivestreamSummary,
    MuteUserRequest, UpdateLivestreamRequest,
};
use uuid::Uuid;

use crate::http::{AppResult, AppState, AuthUser};

pub fn create_livestream_router() -> Router<AppState> {
    Router::new()
        .route("/livestream", post(create_livestream))
        .route("/livestream/one", get(get_livestream_one))
        .route("/livestream/owner/{user_id}", get(get_livestream_by_owner))
        .route(
            "/livestream/{uuid}",
            get(get_livestream_by_id)
                .patch(update_livestream)
                .delete(delete_livestream),
        )
        .route("/livestream/ping-viewer-count/{uuid}", get(ping_viewer_count))
        .route("/livestream/mute-user", post(mute_user))
}

/// POST /livestream
pub async fn create_livestream(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<CreateLivestreamRequest>,
) -> AppResult<Json<CreateLivestreamResponse>> {
    let response = state.livestream.create_livestream(&identity, req).await?;
    Ok(Json(response))
}

/// GET /livestream/one
pub async fn get_livestream_one(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> AppResult<Json<LivestreamSummary>> {
    Ok(Json(state.livestream.get_one(&identity).await?))
}

pub async fn get_livestream_by_owner(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(user_id): Path<String>,
) -> AppResult<Json<LivestreamDetail>> {
    Ok(Json(state.livestream.get_by_owner(&identity, &user_id).await?))
}

pub async fn get_livestream_by_id(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<LivestreamDetail>> {
    Ok(Json(state.livestream.get_by_id(&identity, uuid).await?))
}

pub async fn update_livestream(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(uuid): Path<Uuid>,
    Json(patch): Json<UpdateLivestreamRequest>,
) -> AppResult<Json<Value>> {
    state
        .livestream
        .update_livestream(&identity, uuid, patch)
        .await?;
    Ok(Json(json!({ "message": "Livestream updated" })))
}

pub async fn delete_livestream(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<Value>> {
    state.livestream.delete_livestream(&identity, uuid).await?;
    Ok(Json(json!({ "message": "Livestream deleted" })))
}

/// GET /livestream/ping-viewer-count/{uuid}
///
/// Records the caller as watching and answers the distinct viewer count.
pub async fn ping_viewer_count(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let viewer_count = state.livestream.ping_viewer(&identity, uuid).await?;
    Ok(Json(json!({ "viewer_count": viewer_count })))
}

pub async fn mute_user(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<MuteUserRequest>,
) -> AppResult<Json<Value>> {
    state.livestream.mute_user(&identity, req).await?;
    Ok(Json(json!({ "message": "User muted" })))
}
