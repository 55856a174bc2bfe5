use axum::extract::State;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::AppResult;
use atrium_shared::extract::Json;
use atrium_shared::types::ApiResponse;

use crate::routes::{email_rate_allows, validate_request};
use crate::services::{auth_service, user_service, verification_service};
use crate::AppState;

const RESET_REQUESTED: &str = "if an account exists for this email, a reset link has been sent";

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email(message = "invalid email format"))]
    pub email: String,
}

/// What happened behind the uniform answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetOutcome {
    Sent,
    Throttled,
    UnknownEmail,
}

impl ResetOutcome {
    fn as_str(self) -> &'static str {
        match self {
            ResetOutcome::Sent => "sent",
            ResetOutcome::Throttled => "throttled",
            ResetOutcome::UnknownEmail => "unknown_email",
        }
    }
}

/// Callers cannot tell outcomes apart.
fn reset_response(_outcome: ResetOutcome) -> ApiResponse<()> {
    ApiResponse::message(RESET_REQUESTED)
}

async fn issue_reset(state: &AppState, email: &str) -> AppResult<ResetOutcome> {
    // Limited per address whether or not it is registered, so the limit leaks nothing.
    if !email_rate_allows(state, "reset", email).await {
        return Ok(ResetOutcome::Throttled);
    }

    let ttl = state.config.reset_token_ttl_minutes;
    let (user, token) = {
        let mut conn = get_conn(&state.db)?;
        let Some(user) = user_service::find_by_email(&mut conn, email)? else {
            return Ok(ResetOutcome::UnknownEmail);
        };
        let token = verification_service::issue_reset_token(&mut conn, &user.email, ttl)?;
        (user, token)
    };

    let reset_url = state.config.reset_password_url(&token);
    if let Err(e) = state.email.send_password_reset_link(&user.email, &reset_url, ttl).await {
        tracing::error!(user_id = %user.id, error = %e, "failed to send reset email");
    }

    tracing::info!(user_id = %user.id, "password reset requested");
    Ok(ResetOutcome::Sent)
}

pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PasswordResetRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    let email = auth_service::normalize_email(&req.email);
    validate_request(&PasswordResetRequest { email: email.clone() })?;

    let outcome = issue_reset(&state, &email).await?;
    tracing::debug!(outcome = outcome.as_str(), "password reset request handled");

    Ok(Json(reset_response(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_outcome_gets_the_same_answer() {
        let expected = serde_json::to_value(reset_response(ResetOutcome::Sent)).unwrap();
        assert_eq!(expected["success"], true);
        assert_eq!(expected["message"], RESET_REQUESTED);

        for outcome in [ResetOutcome::Throttled, ResetOutcome::UnknownEmail] {
            assert_eq!(serde_json::to_value(reset_response(outcome)).unwrap(), expected);
        }
    }

    #[test]
    fn email_must_be_well_formed() {
        let req = PasswordResetRequest { email: "nope".into() };
        assert!(validate_request(&req).is_err());
    }
}
