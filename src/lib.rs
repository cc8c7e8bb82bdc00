// SendIt - share files through expiring download links

pub mod config;
pub mod counters;
pub mod db;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod routes;
pub mod services;
pub mod storage;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::{AppState, Backends};

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
