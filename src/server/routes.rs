// ABOUTME: HTTP handlers for client data and health checks
// ABOUTME: Every outcome becomes a stable { success, data | error, message } JSON body

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::PortalError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, message: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: Some(message.to_string()),
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClientDataQuery {
    id: Option<String>,
}

/// `GET /api/client-data?id=<request id>`
pub async fn client_data_handler(
    State(state): State<AppState>,
    query: Result<Query<ClientDataQuery>, QueryRejection>,
) -> Response {
    let id = match query {
        Ok(Query(query)) => query.id.unwrap_or_default(),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Unparseable client-data query");
            String::new()
        }
    };

    match state.orchestrator.resolve_extraction(&id).await {
        Ok(dataset) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                dataset.as_ref(),
                "Data retrieved successfully",
            )),
        )
            .into_response(),
        Err(err) => error_response(&id, &err),
    }
}

fn error_response(id: &str, err: &PortalError) -> Response {
    if err.is_internal() {
        tracing::error!(external_id = id, error = %err, "Client data request failed");
    } else {
        tracing::warn!(external_id = id, error = %err, "Client data request rejected");
    }

    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ApiResponse::failure(err.public_message()))).into_response()
}

/// Any method other than GET/OPTIONS on an API route.
pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ApiResponse::failure("Method not allowed")),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    job_queue_configured: bool,
    crm_configured: bool,
    in_flight: usize,
}

/// `GET /api/health`
pub async fn health_handler(State(state): State<AppState>) -> Json<ApiResponse<HealthReport>> {
    let report = HealthReport {
        job_queue_configured: state.readiness.job_queue_configured,
        crm_configured: state.readiness.crm_configured,
        in_flight: state.orchestrator.in_flight(),
    };
    Json(ApiResponse::success(report, "ok"))
}
