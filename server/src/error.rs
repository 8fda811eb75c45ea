use std::future::Future;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use dealhub_common::promotion::AdmissionDenied;

use crate::processor::ProcessorError;
use crate::store::StoreError;

/// Errors surfaced to HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("promotion slot unavailable: {0}")]
    AdmissionRejected(AdmissionDenied),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::AdmissionRejected(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<ProcessorError> for ApiError {
    fn from(err: ProcessorError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<AdmissionDenied> for ApiError {
    fn from(denied: AdmissionDenied) -> Self {
        ApiError::AdmissionRejected(denied)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reserved: Option<u32>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Upstream(msg) = &self {
            tracing::error!(error = %msg, "request failed upstream");
        }
        let body = match &self {
            ApiError::AdmissionRejected(denied) => ErrorResponse {
                error: self.to_string(),
                reason: Some("capacity_reached"),
                capacity: Some(denied.capacity),
                active: Some(denied.active),
                reserved: Some(denied.reserved),
            },
            _ => ErrorResponse {
                error: self.to_string(),
                reason: None,
                capacity: None,
                active: None,
                reserved: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Run a collaborator call under the caller's deadline. A call whose outcome
/// is unknown when the deadline passes fails closed as `Upstream`.
pub async fn bounded<T, E, F>(limit: Duration, what: &str, call: F) -> ApiResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ApiError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ApiError::Upstream(format!(
            "{what} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
