use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{AppError, ErrorCode};

/// Drop-in for [`axum::Json`] whose rejections use the API error envelope
/// instead of axum's plain-text bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let reason = rejection.body_text();
        match rejection {
            JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => AppError::with_details(
                ErrorCode::ValidationError,
                "invalid request body",
                serde_json::json!({ "body": reason }),
            ),
            JsonRejection::MissingJsonContentType(_) => {
                AppError::bad_request("expected request with `Content-Type: application/json`")
            }
            other if other.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                AppError::new(ErrorCode::PayloadTooLarge, "request body is too large")
            }
            other => {
                tracing::warn!(rejection = ?other, "unhandled json rejection");
                AppError::bad_request(reason)
            }
        }
    }
}

#[axum::async_trait]
impl<T, S> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::post;
    use axum::Router;
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize)]
    struct Reset {
        token: String,
        password: String,
        confirm_password: String,
    }

    async fn reset(Json(req): Json<Reset>) -> String {
        format!("{}:{}:{}", req.token, req.password, req.confirm_password)
    }

    async fn send(body: &str, content_type: Option<&str>) -> (StatusCode, serde_json::Value) {
        let app = Router::new().route("/reset", post(reset));
        let mut req = axum::http::Request::builder().method("POST").uri("/reset");
        if let Some(ct) = content_type {
            req = req.header("Content-Type", ct);
        }
        let response = app.oneshot(req.body(Body::from(body.to_string())).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn absent_field_is_a_validation_error() {
        let (status, value) = send(
            r#"{"token":"abc","password":"Sup3r$ecret"}"#,
            Some("application/json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "E0002");
        assert!(value["error"]["details"]["body"]
            .as_str()
            .unwrap()
            .contains("confirm_password"));
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let (status, value) = send("{not json", Some("application/json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "E0002");
    }

    #[tokio::test]
    async fn missing_content_type_uses_envelope() {
        let (status, value) = send("{}", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "E0006");
    }

    #[tokio::test]
    async fn well_formed_body_reaches_handler() {
        let app = Router::new().route("/reset", post(reset));
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/reset")
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"token":"t","password":"p","confirm_password":"p"}"#))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"t:p:p");
    }
}
