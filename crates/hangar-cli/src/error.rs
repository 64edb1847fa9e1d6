//! HTTP error mapping for the deploy surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hangar_core::domain::DeployError;
use serde::Serialize;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing x-hangar-user header")]
    Unauthenticated,

    #[error("{message}")]
    BadRequest { code: &'static str, message: String },

    #[error("{message}")]
    Quota { code: &'static str, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
    message: String,
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Quota { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::BadRequest { code, .. } | ApiError::Quota { code, .. } => code,
            ApiError::NotFound(_) => "not_found",
            ApiError::Unavailable(_) => "runtime_unavailable",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<DeployError> for ApiError {
    fn from(e: DeployError) -> Self {
        match e {
            DeployError::Validation(v) => ApiError::BadRequest {
                code: v.code,
                message: v.message,
            },
            DeployError::QuotaExceeded(q) => ApiError::Quota {
                code: q.code(),
                message: q.to_string(),
            },
            DeployError::TenantNotFound(name) => ApiError::NotFound(format!("tenant {name} not found")),
            DeployError::AppNotFound(id) => ApiError::NotFound(format!("app {id} not found")),
            DeployError::RuntimeUnavailable(msg) => ApiError::Unavailable(msg),
            DeployError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: status.canonical_reason().unwrap_or("error"),
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_core::domain::{AppId, QuotaExceeded};

    #[test]
    fn deploy_errors_map_to_statuses() {
        let cases = [
            (DeployError::validation("path_traversal", "x"), StatusCode::BAD_REQUEST),
            (
                QuotaExceeded::TooManyApps { count: 1, max: 1 }.into(),
                StatusCode::FORBIDDEN,
            ),
            (
                DeployError::AppNotFound(AppId::parse("01hzz0000000000000000000aa").unwrap()),
                StatusCode::NOT_FOUND,
            ),
            (
                DeployError::RuntimeUnavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn quota_keeps_its_code() {
        let err = ApiError::from(DeployError::from(QuotaExceeded::InsufficientMemory {
            available_mb: 10,
            required_mb: 256,
        }));
        assert_eq!(err.code(), "insufficient_memory");
    }
}
