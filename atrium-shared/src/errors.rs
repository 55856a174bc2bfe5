use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Auth errors
/// - E2xxx: Profile errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    BadRequest,
    PayloadTooLarge,

    // Auth (E1xxx)
    InvalidCredentials,
    EmailAlreadyExists,
    TokenExpired,
    TokenInvalid,
    OAuthError,
    PasswordTooWeak,
    VerificationCodeExpired,
    VerificationCodeInvalid,
    ResetCodeExpired,
    ResetCodeInvalid,
    EmailRateLimited,
    PasswordMismatch,
    UnsupportedProvider,

    // Profile (E2xxx)
    UserNotFound,
    ImageUploadFailed,
    UnsupportedImageType,
    ImageNotFound,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::BadRequest => "E0006",
            Self::PayloadTooLarge => "E0007",

            // Auth
            Self::InvalidCredentials => "E1001",
            Self::EmailAlreadyExists => "E1002",
            Self::TokenExpired => "E1003",
            Self::TokenInvalid => "E1004",
            Self::OAuthError => "E1005",
            Self::PasswordTooWeak => "E1006",
            Self::VerificationCodeExpired => "E1007",
            Self::VerificationCodeInvalid => "E1008",
            Self::ResetCodeExpired => "E1009",
            Self::ResetCodeInvalid => "E1010",
            Self::EmailRateLimited => "E1011",
            Self::PasswordMismatch => "E1012",
            Self::UnsupportedProvider => "E1013",

            // Profile
            Self::UserNotFound => "E2001",
            Self::ImageUploadFailed => "E2002",
            Self::UnsupportedImageType => "E2003",
            Self::ImageNotFound => "E2004",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError | Self::BadRequest | Self::PasswordTooWeak
            | Self::PasswordMismatch | Self::UnsupportedProvider => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound | Self::UserNotFound | Self::ImageNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::InvalidCredentials | Self::TokenExpired
            | Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::VerificationCodeExpired | Self::VerificationCodeInvalid
            | Self::ResetCodeExpired | Self::ResetCodeInvalid => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::EmailRateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::EmailAlreadyExists => StatusCode::CONFLICT,
            Self::OAuthError => StatusCode::BAD_GATEWAY,
            Self::ImageUploadFailed => StatusCode::BAD_GATEWAY,
            Self::UnsupportedImageType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Error code carried by this error, as reported to clients.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::Known { code, .. } => *code,
            AppError::Internal(_) => ErrorCode::InternalError,
            AppError::Database(diesel::result::Error::NotFound) => ErrorCode::NotFound,
            AppError::Database(_) => ErrorCode::InternalError,
            AppError::Validation(_) => ErrorCode::ValidationError,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                if *code == ErrorCode::InternalError {
                    tracing::error!(error = %message, "internal error");
                }
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new("E0003", "resource not found"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new("E0001", "database error"),
                    ),
                }
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("E0002", msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: AppError) -> serde_json::Value {
        let response = err.into_response();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn known_error_envelope() {
        let value = body_json(AppError::new(ErrorCode::EmailAlreadyExists, "email already registered")).await;

        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "E1002");
        assert_eq!(value["error"]["message"], "email already registered");
        assert!(value["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn details_are_forwarded() {
        let err = AppError::with_details(
            ErrorCode::ValidationError,
            "invalid input",
            serde_json::json!({ "field": "email" }),
        );
        let value = body_json(err).await;
        assert_eq!(value["error"]["details"]["field"], "email");
    }

    #[tokio::test]
    async fn status_codes() {
        assert_eq!(
            AppError::new(ErrorCode::InvalidCredentials, "x").into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::new(ErrorCode::EmailRateLimited, "x").into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::new(ErrorCode::ResetCodeExpired, "x").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::new(ErrorCode::UnsupportedImageType, "x").into_response().status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let err = AppError::Internal(anyhow::anyhow!("connection refused on 10.0.0.3"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let value = body_json(AppError::Internal(anyhow::anyhow!("secret detail"))).await;
        assert_eq!(value["error"]["message"], "internal server error");
    }

    #[tokio::test]
    async fn diesel_not_found_maps_to_404() {
        let err = AppError::from(diesel::result::Error::NotFound);
        assert_eq!(err.error_code(), ErrorCode::NotFound);
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
