use axum::extract::State;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::{AppError, AppResult, ErrorCode};
use atrium_shared::extract::Json;
use atrium_shared::types::ApiResponse;

use crate::models::TokenPurpose;
use crate::routes::validate_request;
use crate::schema::users;
use crate::services::{auth_service, token_service, user_service, verification_service};
use crate::AppState;

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
    #[validate(length(min = 1, message = "password confirmation is required"))]
    pub confirm_password: String,
}

impl ResetPasswordRequest {
    /// Everything that can be rejected without spending the token.
    fn check(&self) -> Result<(), AppError> {
        validate_request(self)?;
        auth_service::ensure_passwords_match(&self.password, &self.confirm_password)?;
        auth_service::validate_strong_password(&self.password)
    }
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    req.check()?;

    let password_hash = auth_service::hash_password(&req.password)?;
    let mut conn = get_conn(&state.db)?;

    let purpose = TokenPurpose::PasswordReset;
    let redeemed = verification_service::redeem(&mut conn, None, req.token.trim(), purpose)?
        .map_err(|rejection| rejection.into_app_error(purpose))?;

    let user = user_service::find_by_email(&mut conn, &redeemed.identifier)?
        .ok_or_else(|| AppError::new(ErrorCode::ResetCodeInvalid, "invalid or expired reset token"))?;

    let revoked = conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(users::table.find(user.id))
            .set((
                users::password_hash.eq(Some(password_hash.clone())),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        token_service::revoke_all_sessions(conn, user.id)
    })?;

    tracing::info!(user_id = %user.id, revoked_sessions = revoked, "password reset");

    Ok(Json(ApiResponse::message("password reset successful, please sign in")))
}
