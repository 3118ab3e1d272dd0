use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use labstock_infra::LedgerError;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    let code = err.code();
    let message = err.to_string();

    match err {
        LedgerError::NotFound(_) => json_error(StatusCode::NOT_FOUND, code, message),
        LedgerError::InvalidRequest(_) => json_error(StatusCode::BAD_REQUEST, code, message),
        LedgerError::InsufficientStock { available, requested } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(json!({
                "error": code,
                "message": message,
                "available": available,
                "requested": requested,
            })),
        )
            .into_response(),
        LedgerError::ConflictOrTimeout(_) => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": code,
                "message": message,
                "retryable": true,
            })),
        )
            .into_response(),
        LedgerError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, code, message),
        LedgerError::StoreUnavailable(_) => json_error(StatusCode::SERVICE_UNAVAILABLE, code, message),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path segment as a typed id, or answer 400.
pub fn parse_id<T: core::str::FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}
