// HTTP route handlers for the Kata API

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use kata_common::types::ExecutionRequest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::metrics::{self, Mode};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PlainRequest {
    #[serde(alias = "code")]
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub error: Option<String>,
}

/// POST /validate - Static checks only, nothing is executed
pub async fn validate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlainRequest>,
) -> impl IntoResponse {
    let response = match state.coordinator.guard().validate(&request.source) {
        Ok(()) => ValidateResponse {
            valid: true,
            error: None,
        },
        Err(rejection) => {
            info!(reason = %rejection, "Source failed validation");
            ValidateResponse {
                valid: false,
                error: Some(rejection.to_string()),
            }
        }
    };

    (StatusCode::OK, Json(response))
}

/// POST /execute - Plain run without test cases, graded run otherwise
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecutionRequest>,
) -> impl IntoResponse {
    let mode = if request.test_cases.is_empty() {
        Mode::Plain
    } else {
        Mode::Graded
    };

    let outcome = state.coordinator.execute(&request).await;
    metrics::record(mode, &outcome);

    info!(
        mode = ?mode,
        success = outcome.success,
        execution_time_ms = outcome.execution_time_ms,
        "Execution finished"
    );

    (StatusCode::OK, Json(outcome))
}

/// POST /execute/plain - Run source as-is
pub async fn execute_plain(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlainRequest>,
) -> impl IntoResponse {
    let outcome = state.coordinator.run_plain(&request.source).await;
    metrics::record(Mode::Plain, &outcome);

    (StatusCode::OK, Json(outcome))
}

/// POST /execute/graded - Run source against its test cases
pub async fn execute_graded(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecutionRequest>,
) -> impl IntoResponse {
    let outcome = state
        .coordinator
        .run_graded(&request.source, &request.test_cases)
        .await;
    metrics::record(Mode::Graded, &outcome);

    (StatusCode::OK, Json(outcome))
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn scrape_metrics() -> impl IntoResponse {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}
