use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use formgate_core::AccessError;

/// Map an access failure onto its HTTP status.
///
/// Internal failures are logged in full and answered with a generic message.
pub fn access_error_to_response(err: AccessError) -> axum::response::Response {
    match err {
        AccessError::Unauthorized(msg) => json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg),
        AccessError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        AccessError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        AccessError::InvalidArgument(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_argument", msg)
        }
        AccessError::PreconditionFailed(msg) => {
            json_error(StatusCode::PRECONDITION_FAILED, "precondition_failed", msg)
        }
        err @ (AccessError::Integrity(_) | AccessError::Storage(_)) => {
            tracing::error!(error = %err, kind = ?err.kind(), "request failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
            )
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        let cases = [
            (AccessError::unauthorized("x"), StatusCode::UNAUTHORIZED),
            (AccessError::forbidden("x"), StatusCode::FORBIDDEN),
            (AccessError::not_found("x"), StatusCode::NOT_FOUND),
            (AccessError::invalid_argument("x"), StatusCode::BAD_REQUEST),
            (AccessError::precondition("x"), StatusCode::PRECONDITION_FAILED),
            (AccessError::integrity("cycle"), StatusCode::INTERNAL_SERVER_ERROR),
            (AccessError::storage("db down"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(access_error_to_response(err).status(), status);
        }
    }
}
