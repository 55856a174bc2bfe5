use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;

use crate::errors::{AppError, ErrorCode};
use crate::types::auth::{AuthUser, Claims};

/// HMAC secret used to validate access tokens. Services expose it from their
/// state through `FromRef`.
#[derive(Debug, Clone)]
pub struct JwtSecret(pub String);

impl<T> FromRef<Arc<T>> for JwtSecret
where
    JwtSecret: FromRef<T>,
{
    fn from_ref(state: &Arc<T>) -> Self {
        JwtSecret::from_ref(state.as_ref())
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtSecret: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let secret = JwtSecret::from_ref(state);
        let token = extract_bearer_token(&parts.headers)?;
        let claims = decode_access_token(token, &secret.0)?;

        if claims.is_expired() {
            return Err(AppError::new(ErrorCode::TokenExpired, "token has expired"));
        }

        Ok(AuthUser::from(claims))
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "missing authorization header"))?
        .to_str()
        .map_err(|_| AppError::new(ErrorCode::Unauthorized, "invalid authorization header"))?;

    auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "authorization header must use Bearer scheme"))
}

pub fn decode_access_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::new(ErrorCode::TokenExpired, "token has expired")
        }
        _ => AppError::new(ErrorCode::TokenInvalid, format!("invalid token: {e}")),
    })?;

    Ok(token_data.claims)
}

/// Optional auth extractor. Missing or unusable tokens read as anonymous, but an
/// expired one is still rejected so the client knows to refresh.
pub struct OptionalAuthUser(pub Option<AuthUser>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalAuthUser
where
    S: Send + Sync,
    JwtSecret: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match AuthUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(Self(Some(user))),
            Err(e) if e.error_code() == ErrorCode::TokenExpired => Err(e),
            Err(_) => Ok(Self(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    async fn whoami(user: AuthUser) -> String {
        user.email
    }

    async fn maybe(OptionalAuthUser(user): OptionalAuthUser) -> String {
        user.map(|u| u.email).unwrap_or_else(|| "anonymous".into())
    }

    fn app() -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .route("/maybe", get(maybe))
            .with_state(JwtSecret(SECRET.into()))
    }

    async fn call(path: &str, auth: Option<String>) -> (StatusCode, String) {
        let mut req = Request::builder().uri(path);
        if let Some(value) = auth {
            req = req.header("Authorization", value);
        }
        let response = app().oneshot(req.body(Body::empty()).unwrap()).await.unwrap().into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn valid_token_is_accepted() {
        let token = sign(&Claims::new(Uuid::now_v7(), "ada@example.com", 300), SECRET);
        let (status, body) = call("/whoami", Some(format!("Bearer {token}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ada@example.com");
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let (status, body) = call("/whoami", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("E0004"));
    }

    #[tokio::test]
    async fn wrong_scheme_is_unauthorized() {
        let (status, _) = call("/whoami", Some("Basic abc".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn foreign_signature_is_rejected() {
        let token = sign(&Claims::new(Uuid::now_v7(), "ada@example.com", 300), "other-secret");
        let (status, body) = call("/whoami", Some(format!("Bearer {token}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("E1004"));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let token = sign(&Claims::new(Uuid::now_v7(), "ada@example.com", -3600), SECRET);
        let (status, body) = call("/whoami", Some(format!("Bearer {token}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("E1003"));
    }

    #[tokio::test]
    async fn secret_is_found_behind_arc() {
        let app = Router::new()
            .route("/whoami", get(whoami))
            .with_state(Arc::new(JwtSecret(SECRET.into())));
        let token = sign(&Claims::new(Uuid::now_v7(), "ada@example.com", 300), SECRET);
        let req = Request::builder()
            .uri("/whoami")
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn optional_auth_falls_back_to_anonymous() {
        let (status, body) = call("/maybe", Some("Bearer garbage".into())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "anonymous");

        let token = sign(&Claims::new(Uuid::now_v7(), "bob@example.com", 300), SECRET);
        let (_, body) = call("/maybe", Some(format!("Bearer {token}"))).await;
        assert_eq!(body, "bob@example.com");
    }

    #[tokio::test]
    async fn optional_auth_reports_expired_sessions() {
        let token = sign(&Claims::new(Uuid::now_v7(), "bob@example.com", -3600), SECRET);
        let (status, body) = call("/maybe", Some(format!("Bearer {token}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("E1003"));

        let (status, body) = call("/maybe", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "anonymous");
    }
}
