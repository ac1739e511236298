//! API error types

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::quota::QuotaExceeded;
use crate::storage::StorageError;

/// One rejected input field.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("Access denied: {0}")]
    AccessDenied(&'static str),

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error("Not found: {0}")]
    NotFound(&'static str),

    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                let field = field.to_string();
                errs.iter().map(move |err| FieldError {
                    field: field.clone(),
                    message: err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| err.code.to_string()),
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::Validation(fields)
    }
}

/// Error response body
#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_reached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl ErrorResponse {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.into(),
            limit_reached: None,
            errors: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    errors: Some(errors),
                    ..ErrorResponse::new("VALIDATION_ERROR", "Validation failed")
                },
            ),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorResponse::new("UNAUTHORIZED", msg))
            }
            ApiError::AccessDenied(msg) => {
                (StatusCode::FORBIDDEN, ErrorResponse::new("ACCESS_DENIED", msg))
            }
            ApiError::QuotaExceeded(_) => (
                StatusCode::FORBIDDEN,
                ErrorResponse {
                    limit_reached: Some(true),
                    ..ErrorResponse::new(
                        "QUOTA_EXCEEDED",
                        "Note limit reached. Upgrade to Pro for unlimited notes.",
                    )
                },
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorResponse::new("NOT_FOUND", msg)),
            ApiError::RateLimited { retry_after_secs } => {
                let body = ErrorResponse::new(
                    "RATE_LIMITED",
                    "Too many requests from this IP, please try again later.",
                );
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    Json(body),
                )
                    .into_response();
            }
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("INTERNAL_ERROR", "Server error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct NoteInput {
        #[validate(length(min = 1, message = "Title is required"))]
        title: String,
        #[validate(length(min = 1))]
        content: String,
    }

    #[test]
    fn test_validation_errors_are_reported_per_field() {
        let input = NoteInput {
            title: String::new(),
            content: String::new(),
        };
        let err = ApiError::from(input.validate().unwrap_err());
        match err {
            ApiError::Validation(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].field, "content");
                assert_eq!(fields[0].message, "length");
                assert_eq!(fields[1].field, "title");
                assert_eq!(fields[1].message, "Title is required");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::QuotaExceeded(QuotaExceeded { limit: 3 }).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::NotFound("Note not found").into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::AccessDenied("Access denied").into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Internal("sled exploded".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
