use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/execute", post(handlers::execute))
        .route("/execute/plain", post(handlers::execute_plain))
        .route("/execute/graded", post(handlers::execute_graded))
        .route("/validate", post(handlers::validate))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::scrape_metrics))
}
