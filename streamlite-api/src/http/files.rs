// HLS file delivery and archive download.
//
// Freshness is handled by the in-process segment cache, so every response
// tells clients and proxies not to cache.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_util::io::ReaderStream;
use tracing::error;
use uuid::Uuid;

use crate::http::{AppError, AppResult, AppState, AuthUser};

const NO_STORE: &str = "no-cache, no-store, must-revalidate";

pub fn create_files_router() -> Router<AppState> {
    Router::new()
        .route("/livestream/record/{uuid}", get(get_record))
        .route("/livestream/{uuid}/{filename}", get(get_file))
}

/// Content type by extension: playlists, transport segments, anything else
#[must_use]
pub fn content_type(filename: &str) -> &'static str {
    match std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}

/// GET /livestream/{uuid}/{filename}
pub async fn get_file(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path((uuid, filename)): Path<(Uuid, String)>,
) -> AppResult<Response> {
    let bytes = state
        .livestream
        .get_file(&identity, uuid, &filename)
        .await
        .map_err(|e| match e {
            streamlite_core::Error::NotFound(_) => AppError::not_found("File not found"),
            other => other.into(),
        })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type(&filename)),
            (header::CACHE_CONTROL, NO_STORE),
        ],
        bytes,
    )
        .into_response())
}

/// GET /livestream/record/{uuid}
///
/// Streams the converted archive. Answers 404 while the conversion runs.
pub async fn get_record(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(uuid): Path<Uuid>,
) -> AppResult<Response> {
    let path = state.livestream.get_archive(&identity, uuid).await?;

    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to open archive");
        AppError::not_found("Archive not found")
    })?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("archive.mp4");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}
