// Module: http
// JSON REST API plus HLS file delivery

pub mod chat;
pub mod error;
pub mod files;
pub mod health;
pub mod livestream;
pub mod middleware;

use axum::Router;
use std::sync::Arc;
use streamlite_core::service::{IdentityAuthorizer, LivestreamService};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};
pub use middleware::AuthUser;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub livestream: LivestreamService,
    pub authorizer: Arc<dyn IdentityAuthorizer>,
}

impl AppState {
    pub fn new(livestream: LivestreamService, authorizer: Arc<dyn IdentityAuthorizer>) -> Self {
        Self {
            livestream,
            authorizer,
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::create_health_router())
        .merge(livestream::create_livestream_router())
        .merge(chat::create_chat_router())
        .merge(files::create_files_router());

    router
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
