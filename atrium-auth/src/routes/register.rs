use axum::extract::State;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::{AppError, AppResult, ErrorCode};
use atrium_shared::extract::Json;
use atrium_shared::types::auth::TokenPair;
use atrium_shared::types::ApiResponse;

use crate::models::{NewUser, User, UserSummary};
use crate::routes::validate_request;
use crate::schema::users;
use crate::services::{auth_service, token_service, user_service, verification_service};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 255, message = "name must be at least 2 characters"))]
    pub name: String,
    #[validate(email(message = "invalid email format"))]
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegisterRequest {
    fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.email = auth_service::normalize_email(&self.email);
        self
    }

    fn check(&self) -> Result<(), AppError> {
        validate_request(self)?;
        auth_service::validate_password(&self.password)?;
        auth_service::ensure_passwords_match(&self.password, &self.confirm_password)
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: UserSummary,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

fn email_taken() -> AppError {
    AppError::new(ErrorCode::EmailAlreadyExists, "email already registered")
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<ApiResponse<RegisterResponse>>> {
    let req = req.normalized();
    req.check()?;

    let password_hash = auth_service::hash_password(&req.password)?;
    let ttl = state.config.verification_code_ttl_minutes;

    // Released before the verification mail goes out.
    let (user, code, tokens) = {
        let mut conn = get_conn(&state.db)?;

        if user_service::find_by_email(&mut conn, &req.email)?.is_some() {
            return Err(email_taken());
        }

        let new_user = NewUser {
            name: Some(req.name),
            email: req.email,
            password_hash: Some(password_hash),
            email_verified: None,
            image: None,
        };

        // A concurrent sign-up can still win the unique index.
        let user: User = diesel::insert_into(users::table)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result(&mut conn)
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => email_taken(),
                other => other.into(),
            })?;

        let code = verification_service::issue_email_code(&mut conn, &user.email, ttl)?;
        let tokens = token_service::issue_session(&mut conn, user.id, &user.email, &state.config)?;
        (user, code, tokens)
    };

    if let Err(e) = state.email.send_verification_code(&user.email, &code, ttl).await {
        tracing::error!(user_id = %user.id, error = %e, "failed to send verification email");
    }

    metrics::counter!("atrium_signups_total", "method" => "credentials").increment(1);
    tracing::info!(user_id = %user.id, email = %user.email, "user registered");

    Ok(Json(ApiResponse::ok_with_message(
        RegisterResponse { user: UserSummary::from(&user), tokens },
        "account created, check your inbox for a verification code",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, email: &str, password: &str, confirm: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            confirm_password: confirm.into(),
        }
        .normalized()
    }

    #[test]
    fn valid_request_is_normalized() {
        let req = request("  Ada ", " Ada@Example.com", "password1", "password1");
        assert!(req.check().is_ok());
        assert_eq!(req.name, "Ada");
        assert_eq!(req.email, "ada@example.com");
    }

    #[test]
    fn short_name_is_a_validation_error() {
        let err = request(" A ", "ada@example.com", "password1", "password1").check().unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationError);
    }

    #[test]
    fn bad_email_is_a_validation_error() {
        let err = request("Ada", "not-an-email", "password1", "password1").check().unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationError);
    }

    #[test]
    fn password_rules_apply() {
        let weak = request("Ada", "ada@example.com", "short", "short").check().unwrap_err();
        assert_eq!(weak.error_code(), ErrorCode::PasswordTooWeak);

        let mismatch = request("Ada", "ada@example.com", "password1", "password2").check().unwrap_err();
        assert_eq!(mismatch.error_code(), ErrorCode::PasswordMismatch);
    }

    #[test]
    fn response_flattens_tokens() {
        let user_id = uuid::Uuid::now_v7();
        let response = RegisterResponse {
            user: UserSummary {
                id: user_id,
                name: Some("Ada".into()),
                email: "ada@example.com".into(),
                email_verified: false,
            },
            tokens: TokenPair::new("access".into(), "refresh".into(), 3600),
        };
        let value = serde_json::to_value(response).unwrap();
        assert_eq!(value["access_token"], "access");
        assert_eq!(value["user"]["email"], "ada@example.com");
        assert_eq!(value["user"]["email_verified"], false);
    }
}
