//! HTTP surface of StreamLite.
//!
//! Every route authenticates the caller from a bearer token and hands off to
//! [`streamlite_core::service::LivestreamService`], which applies role gates.

pub mod http;

pub use http::{create_router, AppError, AppResult, AppState};
