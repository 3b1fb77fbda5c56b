use serde::{Deserialize, Serialize};

use crate::models::{EstimationRequest, EstimationResult, ModelAttempt};
use crate::services::EstimationError;

/// Body of `POST /estimate`.
#[derive(Debug, Deserialize, Serialize)]
pub struct EstimatePayload {
    pub user_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl EstimatePayload {
    pub fn to_request(&self) -> EstimationRequest {
        EstimationRequest::new(self.description.clone(), self.image_ref.clone())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateResponse {
    pub meal_id: i64,
    pub summary: String,
    #[serde(flatten)]
    pub result: EstimationResult,
    pub attempts: Vec<ModelAttempt>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl From<&EstimationError> for ErrorResponse {
    fn from(err: &EstimationError) -> Self {
        ErrorResponse {
            error: err.kind(),
            message: err.user_message(),
        }
    }
}

/// HTTP status for each failure kind.
pub fn status_code(err: &EstimationError) -> u16 {
    match err {
        EstimationError::RequestInvalid => 400,
        EstimationError::QuotaExceeded { .. } => 429,
        EstimationError::PayloadTooLarge { .. } => 413,
        EstimationError::Fetch(_) => 422,
        EstimationError::Validation(_) => 422,
        EstimationError::TransientUpstream { .. } => 502,
        EstimationError::Configuration(_) => 503,
        EstimationError::Internal(_) => 500,
    }
}

// Axum integration (optional - requires axum dependency)
#[cfg(feature = "webhook-server")]
pub mod server {
    use super::*;
    use crate::handlers::{format_estimate_summary, EstimateHandler};
    use axum::{
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    };
    use std::sync::Arc;

    pub struct AppState {
        pub estimate_handler: Arc<EstimateHandler>,
    }

    pub fn create_router(estimate_handler: Arc<EstimateHandler>) -> Router {
        let state = Arc::new(AppState { estimate_handler });

        Router::new()
            .route("/", get(root_handler))
            .route("/estimate", post(estimate))
            .route("/health", get(health_check))
            .with_state(state)
    }

    async fn estimate(
        State(state): State<Arc<AppState>>,
        Json(payload): Json<EstimatePayload>,
    ) -> Response {
        log::info!("🔔 Estimate request from {}", payload.user_id);

        let request = payload.to_request();
        match state.estimate_handler.handle(&payload.user_id, &request).await {
            Ok(saved) => {
                let body = EstimateResponse {
                    meal_id: saved.meal_id,
                    summary: format_estimate_summary(&saved.estimation.result),
                    result: saved.estimation.result,
                    attempts: saved.estimation.attempts,
                };
                (StatusCode::OK, Json(body)).into_response()
            }
            Err(err) => {
                let status = StatusCode::from_u16(status_code(&err))
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(ErrorResponse::from(&err))).into_response()
            }
        }
    }

    async fn root_handler() -> &'static str {
        "Nutrition Estimator - POST /estimate with {user_id, description?, image_ref?}"
    }

    async fn health_check() -> &'static str {
        "OK"
    }
}
