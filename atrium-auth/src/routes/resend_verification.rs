use axum::extract::State;
use std::sync::Arc;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::AppResult;
use atrium_shared::extract::Json;
use atrium_shared::types::auth::AuthUser;
use atrium_shared::types::ApiResponse;

use crate::routes::check_email_rate;
use crate::services::{user_service, verification_service};
use crate::AppState;

pub async fn resend_verification(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<()>>> {
    let record = {
        let mut conn = get_conn(&state.db)?;
        user_service::find_by_id(&mut conn, user.id)?
    };

    if record.is_verified() {
        return Ok(Json(ApiResponse::message("email already verified")));
    }

    check_email_rate(&state, "verify", &record.email).await?;

    let ttl = state.config.verification_code_ttl_minutes;
    let code = {
        let mut conn = get_conn(&state.db)?;
        verification_service::issue_email_code(&mut conn, &record.email, ttl)?
    };
    if let Err(e) = state.email.send_verification_code(&record.email, &code, ttl).await {
        tracing::error!(user_id = %record.id, error = %e, "failed to send verification email");
    }

    tracing::info!(user_id = %record.id, "verification code reissued");

    Ok(Json(ApiResponse::message("verification code sent")))
}
