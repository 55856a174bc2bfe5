use axum::extract::State;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::{AppError, AppResult, ErrorCode};
use atrium_shared::extract::Json;
use atrium_shared::types::auth::TokenPair;
use atrium_shared::types::ApiResponse;

use crate::models::RefreshToken;
use crate::schema::refresh_tokens;
use crate::services::{token_service, user_service};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

fn invalid_refresh_token() -> AppError {
    AppError::new(ErrorCode::TokenInvalid, "invalid refresh token")
}

pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<ApiResponse<TokenPair>>> {
    let token_hash = token_service::hash_token(&req.refresh_token);
    let mut conn = get_conn(&state.db)?;

    let tokens = conn.transaction::<_, AppError, _>(|conn| {
        let stored: RefreshToken = refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(&token_hash))
            .filter(refresh_tokens::revoked_at.is_null())
            .select(RefreshToken::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(invalid_refresh_token)?;

        let now = Utc::now();
        if stored.expires_at <= now {
            return Err(AppError::new(ErrorCode::TokenExpired, "refresh token expired"));
        }

        // Guarded on revoked_at so two concurrent rotations cannot both succeed.
        let revoked = diesel::update(
            refresh_tokens::table
                .find(stored.id)
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set(refresh_tokens::revoked_at.eq(Some(now)))
        .execute(conn)?;
        if revoked == 0 {
            return Err(invalid_refresh_token());
        }

        let user = user_service::find_by_id(conn, stored.user_id)?;
        token_service::issue_session(conn, user.id, &user.email, &state.config)
    })?;

    Ok(Json(ApiResponse::ok(tokens)))
}
