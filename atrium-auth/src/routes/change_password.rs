use axum::extract::State;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::{AppError, AppResult, ErrorCode};
use atrium_shared::extract::Json;
use atrium_shared::types::auth::{AuthUser, TokenPair};
use atrium_shared::types::ApiResponse;

use crate::schema::users;
use crate::services::{auth_service, token_service, user_service};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

impl ChangePasswordRequest {
    fn check(&self) -> Result<(), AppError> {
        auth_service::ensure_passwords_match(&self.new_password, &self.confirm_password)?;
        auth_service::validate_strong_password(&self.new_password)?;
        if self.new_password == self.current_password {
            return Err(AppError::bad_request("new password must differ from the current one"));
        }
        Ok(())
    }
}

/// Replaces the password, signs out every other session and returns a fresh
/// session for the caller.
pub async fn change_password(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChangePasswordRequest>,
) -> AppResult<Json<ApiResponse<TokenPair>>> {
    let mut conn = get_conn(&state.db)?;
    let record = user_service::find_by_id(&mut conn, user.id)?;

    let Some(current_hash) = record.password_hash.as_deref() else {
        return Err(AppError::bad_request(
            "this account signs in with a social provider; use password reset to set a password",
        ));
    };

    if !auth_service::verify_password(&req.current_password, current_hash)? {
        return Err(AppError::new(ErrorCode::InvalidCredentials, "current password is incorrect"));
    }
    req.check()?;

    let new_hash = auth_service::hash_password(&req.new_password)?;
    let tokens = conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(users::table.find(record.id))
            .set((
                users::password_hash.eq(Some(new_hash.clone())),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        token_service::revoke_all_sessions(conn, record.id)?;
        token_service::issue_session(conn, record.id, &record.email, &state.config)
    })?;

    tracing::info!(user_id = %record.id, "password changed");

    Ok(Json(ApiResponse::ok_with_message(tokens, "password updated")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(current: &str, new: &str, confirm: &str) -> ChangePasswordRequest {
        ChangePasswordRequest {
            current_password: current.into(),
            new_password: new.into(),
            confirm_password: confirm.into(),
        }
    }

    #[test]
    fn accepts_a_strong_new_password() {
        assert!(request("old-pass", "N3w$ecret!", "N3w$ecret!").check().is_ok());
    }

    #[test]
    fn rejects_reuse_and_weak_passwords() {
        let reuse = request("N3w$ecret!", "N3w$ecret!", "N3w$ecret!").check().unwrap_err();
        assert_eq!(reuse.error_code(), ErrorCode::BadRequest);

        let weak = request("old", "alllowercase1!", "alllowercase1!").check().unwrap_err();
        assert_eq!(weak.error_code(), ErrorCode::PasswordTooWeak);

        let mismatch = request("old", "N3w$ecret!", "N3w$ecret?").check().unwrap_err();
        assert_eq!(mismatch.error_code(), ErrorCode::PasswordMismatch);
    }
}
