use std::sync::Arc;

use axum::{routing::get, Router};

use crate::config::AppConfig;
use crate::db::Repository;
use crate::monitor::strategy::PollingStrategy;

pub mod error;
pub mod models;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub strategy: Arc<dyn PollingStrategy>,
    pub http_client: reqwest::Client,
    pub config: Arc<AppConfig>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check_handler))
        .merge(routes::device_routes::device_router())
        .with_state(Arc::new(state))
}
