use axum::extract::State;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::{AppError, AppResult, ErrorCode};
use atrium_shared::extract::Json;
use atrium_shared::middleware::OptionalAuthUser;
use atrium_shared::types::ApiResponse;

use crate::models::TokenPurpose;
use crate::schema::users;
use crate::services::{auth_service, user_service, verification_service};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    /// Absent codes are treated like wrong ones.
    #[serde(default)]
    pub code: String,
    /// Needed only when the caller is not signed in.
    pub email: Option<String>,
}

fn is_well_formed_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

fn email_from_request(email: Option<&str>) -> Result<String, AppError> {
    email
        .map(auth_service::normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::new(ErrorCode::ValidationError, "email is required when not signed in"))
}

pub async fn verify_email(
    OptionalAuthUser(auth): OptionalAuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyEmailRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    let code = req.code.trim();
    let mut conn = get_conn(&state.db)?;

    let identifier = match auth {
        Some(user) => user_service::find_by_id(&mut conn, user.id)?.email,
        None => email_from_request(req.email.as_deref())?,
    };

    if !is_well_formed_code(code) {
        return Err(AppError::new(ErrorCode::VerificationCodeInvalid, "invalid verification code"));
    }

    let purpose = TokenPurpose::EmailVerification;
    verification_service::redeem(&mut conn, Some(identifier.as_str()), code, purpose)?
        .map_err(|rejection| rejection.into_app_error(purpose))?;

    let updated = diesel::update(
        users::table
            .filter(users::email.eq(&identifier))
            .filter(users::email_verified.is_null()),
    )
    .set((
        users::email_verified.eq(Some(Utc::now())),
        users::updated_at.eq(Utc::now()),
    ))
    .execute(&mut conn)?;

    tracing::info!(email = %identifier, updated, "email verified");

    Ok(Json(ApiResponse::message("email verified")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_must_be_six_digits() {
        assert!(is_well_formed_code("123456"));
        assert!(!is_well_formed_code("12345"));
        assert!(!is_well_formed_code("1234567"));
        assert!(!is_well_formed_code("12a456"));
        assert!(!is_well_formed_code("１２３４５６"));
    }

    #[test]
    fn anonymous_callers_must_name_an_email() {
        assert_eq!(
            email_from_request(None).unwrap_err().error_code(),
            ErrorCode::ValidationError
        );
        assert!(email_from_request(Some("   ")).is_err());
        assert_eq!(email_from_request(Some(" Ada@Example.com ")).unwrap(), "ada@example.com");
    }

    #[test]
    fn absent_code_reads_as_malformed() {
        let req: VerifyEmailRequest =
            serde_json::from_value(serde_json::json!({ "email": "ada@example.com" })).unwrap();
        assert!(req.code.is_empty());
        assert!(!is_well_formed_code(&req.code));
    }
}
