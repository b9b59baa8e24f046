//! Chat endpoints
//!
//! Clients poll `GET /livestream/chat/{uuid}/{index}` with the last id they
//! saw (or `newest`/`-1` for the latest page) and reconcile deletions through
//! `GET /livestream/chat/delete/{uuid}`.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use streamlite_core::models::{AddChatRequest, ChatCursor, ChatId, ChatMessage};
use uuid::Uuid;

use crate::http::{AppError, AppResult, AppState, AuthUser};

pub fn create_chat_router() -> Router<AppState> {
    Router::new()
        .route("/livestream/chat", post(add_chat))
        .route("/livestream/chat/delete/{uuid}", get(get_deleted_chat_ids))
        // one pattern for both methods: the trailing segment is a cursor on
        // GET and a chat id on DELETE
        .route(
            "/livestream/chat/{uuid}/{index}",
            get(get_chat).delete(delete_chat),
        )
}

pub async fn get_chat(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path((uuid, index)): Path<(Uuid, String)>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let cursor: ChatCursor = index
        .parse()
        .map_err(|e| AppError::bad_request(format!("Invalid chat index: {e}")))?;
    Ok(Json(state.livestream.get_chat(&identity, uuid, cursor).await?))
}

/// POST /livestream/chat
pub async fn add_chat(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<AddChatRequest>,
) -> AppResult<Json<Value>> {
    let id = state.livestream.add_chat(&identity, req).await?;
    Ok(Json(json!({ "message": "Chat added", "id": id })))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path((uuid, chat_id)): Path<(Uuid, String)>,
) -> AppResult<Json<Value>> {
    let id: ChatId = chat_id
        .parse()
        .map_err(|e| AppError::bad_request(format!("Invalid chat id: {e}")))?;
    state.livestream.delete_chat(&identity, uuid, id).await?;
    Ok(Json(json!({ "message": "Chat deleted" })))
}

pub async fn get_deleted_chat_ids(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<Vec<ChatId>>> {
    Ok(Json(state.livestream.tombstones(&identity, uuid).await?))
}
