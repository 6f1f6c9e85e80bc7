use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    pub fn forbidden() -> Self {
        ApiError::Forbidden("not allowed for this subject".into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Engine(e) => match e {
                EngineError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
                EngineError::NotFound(..) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                EngineError::AlreadyExists(_) => (StatusCode::CONFLICT, "ALREADY_EXISTS"),
                EngineError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
                EngineError::LimitExceeded(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "LIMIT_EXCEEDED")
                }
                EngineError::WalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            ApiError::Engine(e @ EngineError::WalError(_)) => {
                error!("storage failure: {e}");
                "internal storage error".to_string()
            }
            other => {
                warn!(code, "request rejected: {other}");
                other.to_string()
            }
        };
        if let ApiError::Engine(e) = &self {
            metrics::counter!(
                crate::observability::ENGINE_ERRORS_TOTAL,
                "kind" => crate::observability::error_label(e)
            )
            .increment(1);
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (EngineError::NotFound("staff", Ulid::nil()), StatusCode::NOT_FOUND),
            (EngineError::AlreadyExists(Ulid::nil()), StatusCode::CONFLICT),
            (EngineError::Conflict(Ulid::nil()), StatusCode::CONFLICT),
            (EngineError::LimitExceeded("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (EngineError::WalError("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn conflict_has_distinct_code() {
        let err = ApiError::from(EngineError::Conflict(Ulid::nil()));
        assert_eq!(err.status_and_code().1, "CONFLICT");
        let err = ApiError::from(EngineError::AlreadyExists(Ulid::nil()));
        assert_eq!(err.status_and_code().1, "ALREADY_EXISTS");
    }

    #[test]
    fn auth_errors() {
        assert_eq!(
            ApiError::Unauthorized("no".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::forbidden().into_response().status(), StatusCode::FORBIDDEN);
    }
}
