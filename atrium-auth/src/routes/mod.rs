pub mod change_password;
pub mod forgot_password;
pub mod health;
pub mod login;
pub mod logout;
pub mod me;
pub mod oauth;
pub mod profile_image;
pub mod refresh;
pub mod register;
pub mod resend_verification;
pub mod reset_password;
pub mod verify_email;

use validator::{Validate, ValidationErrors};

use atrium_shared::errors::{AppError, ErrorCode};

use crate::AppState;

fn validation_error(errors: ValidationErrors) -> AppError {
    let details = serde_json::to_value(errors.field_errors()).unwrap_or_default();
    AppError::with_details(ErrorCode::ValidationError, "invalid request", details)
}

pub(crate) fn validate_request<T: Validate>(req: &T) -> Result<(), AppError> {
    req.validate().map_err(validation_error)
}

/// Fixed-window limit on one-time-code mail per address. Redis outages fail open.
pub(crate) async fn email_rate_allows(state: &AppState, purpose: &str, email: &str) -> bool {
    let key = atrium_shared::clients::redis::email_rate_key(purpose, email);
    let allowed = state
        .redis
        .rate_limit_check(&key, 1, state.config.email_rate_window_secs)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "rate limiter unavailable");
            true
        });

    if !allowed {
        metrics::counter!("atrium_email_rate_limited_total", "purpose" => purpose.to_string()).increment(1);
    }
    allowed
}

pub(crate) async fn check_email_rate(state: &AppState, purpose: &str, email: &str) -> Result<(), AppError> {
    if !email_rate_allows(state, purpose, email).await {
        return Err(AppError::new(
            ErrorCode::EmailRateLimited,
            "please wait before requesting another email",
        ));
    }
    Ok(())
}
