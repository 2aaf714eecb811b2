use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::admission::AdmissionGateway;
use crate::clients::health::HealthChecker;
use crate::error::AdmitError;
use crate::models::health::HealthStatus;
use crate::models::request::AdmitRequest;
use crate::models::response::{AdmitResponseBody, ApiResponse};
use crate::models::status::DeliveryStatus;
use crate::store::StatusStore;

pub struct AppState {
    pub gateway: AdmissionGateway,
    pub statuses: Arc<dyn StatusStore>,
    pub health_checker: HealthChecker,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/notifications", post(admit))
        .route("/api/v1/notifications/{notification_id}", get(status))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(state: Arc<AppState>, port: u16) -> Result<(), anyhow::Error> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

async fn admit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AdmitRequest>,
) -> impl IntoResponse {
    match state.gateway.admit(request).await {
        Ok(admitted) => {
            let body = AdmitResponseBody {
                notification_id: admitted.notification_id,
                status: admitted.state,
                correlation_id: admitted.correlation_id,
                remaining_requests: admitted.remaining_requests,
            };

            let message = if admitted.duplicate {
                "Request already admitted".to_string()
            } else {
                "Notification accepted for dispatch".to_string()
            };

            (
                StatusCode::ACCEPTED,
                Json(ApiResponse::success(body, message)),
            )
                .into_response()
        }
        Err(e) => admit_error_response(e),
    }
}

fn admit_error_response(error: AdmitError) -> axum::response::Response {
    let (status, kind) = match &error {
        AdmitError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        AdmitError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        AdmitError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };

    (
        status,
        Json(ApiResponse::<AdmitResponseBody>::error(
            kind.to_string(),
            error.to_string(),
        )),
    )
        .into_response()
}

async fn status(
    State(state): State<Arc<AppState>>,
    Path(notification_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.statuses.get(notification_id).await {
        Ok(Some(status)) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                status,
                "Delivery status".to_string(),
            )),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<DeliveryStatus>::error(
                "not_found".to_string(),
                format!("No notification {}", notification_id),
            )),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::<DeliveryStatus>::error(
                "unavailable".to_string(),
                e.to_string(),
            )),
        )
            .into_response(),
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
