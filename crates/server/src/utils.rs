use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::{ErrorResponse, HealthResponse};

pub fn json_error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn json_ok_response() -> Response {
    Json(HealthResponse { status: "ok" }).into_response()
}

/// Runs blocking store or blob work on the blocking pool under `timeout`.
pub async fn run_blocking<T, F>(timeout: std::time::Duration, work: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("worker error: {}", err),
        )),
        Err(_) => Err(json_error_response(
            StatusCode::GATEWAY_TIMEOUT,
            "request timed out",
        )),
    }
}
