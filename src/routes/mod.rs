//! HTTP routes
//!
//! - `POST /upload` - multipart upload (`file` part, `email` field), rate limited
//! - `GET /download/{record_id}` - stream a stored file
//! - `GET /warmup` - liveness check

pub mod files;
pub mod health;

use std::any::Any;

use axum::response::IntoResponse;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::middleware::apply_cors;
use crate::models::AppState;
use crate::types::AppError;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let router = Router::new()
        .merge(files::router(state))
        .merge(health::router())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http());

    apply_cors(router)
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> axum::response::Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(detail, "Handler panicked");
    AppError::Internal(format!("handler panicked: {}", detail)).into_response()
}
