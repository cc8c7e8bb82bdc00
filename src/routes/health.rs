use axum::{routing::get, Router};

pub fn router() -> Router {
    Router::new().route("/warmup", get(warmup))
}

/// Liveness check used to wake the service up.
async fn warmup() -> &'static str {
    "OK"
}
