use axum::extract::State;
use serde::Deserialize;
use std::sync::Arc;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::{AppError, AppResult, ErrorCode};
use atrium_shared::extract::Json;
use atrium_shared::types::auth::TokenPair;
use atrium_shared::types::ApiResponse;

use crate::services::{auth_service, token_service, user_service};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

fn invalid_credentials() -> AppError {
    AppError::new(ErrorCode::InvalidCredentials, "invalid email or password")
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<TokenPair>>> {
    let email = auth_service::normalize_email(&req.email);
    let mut conn = get_conn(&state.db)?;

    let Some(user) = user_service::find_by_email(&mut conn, &email)? else {
        auth_service::verify_against_dummy(&req.password);
        return Err(invalid_credentials());
    };

    // OAuth-only accounts get the same answer as a wrong password.
    let Some(hash) = user.password_hash.as_deref() else {
        auth_service::verify_against_dummy(&req.password);
        return Err(invalid_credentials());
    };
    if !auth_service::verify_password(&req.password, hash)? {
        metrics::counter!("atrium_login_failures_total").increment(1);
        return Err(invalid_credentials());
    }

    let tokens = token_service::issue_session(&mut conn, user.id, &user.email, &state.config)?;

    tracing::info!(user_id = %user.id, "user logged in");

    Ok(Json(ApiResponse::ok(tokens)))
}
