//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Server-side error taxonomy. Route handlers return this; the `IntoResponse`
/// impl maps each variant to a status code and the standard error envelope.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("storage: {0}")]
    Storage(String),
    #[error("internal error")]
    Internal(String),
}

impl AppError {
    /// Map unique-constraint violations to a friendly conflict; everything
    /// else stays a database error.
    pub fn from_db(e: sqlx::Error, conflict_message: &str) -> Self {
        if let sqlx::Error::Database(ref db) = e {
            if db.code().as_deref() == Some("23505") {
                return AppError::Conflict(conflict_message.to_string());
            }
        }
        AppError::Db(e)
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            AppError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        // Internal details go to the log, not the client.
        let message = match &self {
            AppError::Db(e) if !matches!(e, sqlx::Error::RowNotFound) => {
                tracing::error!(error = %e, "database error");
                "internal error".to_string()
            }
            AppError::Internal(detail) | AppError::Storage(detail) => {
                tracing::error!(error = %detail, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Client-side error for all three backend adapters. One tagged type for
/// every public operation — no per-adapter throw-vs-error-field split.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("backend error ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("no active session")]
    NoSession,
    #[error("no row found where exactly one was expected")]
    NoRows,
    #[error("configuration: {0}")]
    Config(String),
}

impl BackendError {
    /// Build an `Api` error from a non-2xx response body. Bodies are expected
    /// to carry the `{"error":{code,message}}` envelope; anything else falls
    /// back to a generic message.
    pub fn from_response_body(status: u16, body: &str) -> Self {
        let parsed: Option<(String, String)> = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                let err = v.get("error")?;
                let code = err.get("code")?.as_str()?.to_string();
                let message = err.get("message")?.as_str()?.to_string();
                Some((code, message))
            });
        match parsed {
            Some((code, message)) => BackendError::Api {
                status,
                code,
                message,
            },
            None => BackendError::Api {
                status,
                code: "unknown".into(),
                message: format!("request failed with status {}", status),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_parses_envelope() {
        let e = BackendError::from_response_body(409, r#"{"error":{"code":"conflict","message":"slug already exists"}}"#);
        match e {
            BackendError::Api { status, code, message } => {
                assert_eq!(status, 409);
                assert_eq!(code, "conflict");
                assert_eq!(message, "slug already exists");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn api_error_falls_back_on_garbage_body() {
        let e = BackendError::from_response_body(500, "<html>oops</html>");
        match e {
            BackendError::Api { code, message, .. } => {
                assert_eq!(code, "unknown");
                assert!(message.contains("500"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
