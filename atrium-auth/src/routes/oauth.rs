use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::{AppError, AppResult, ErrorCode};
use atrium_shared::extract::Json;
use atrium_shared::types::auth::{OAuthProvider, TokenPair};
use atrium_shared::types::ApiResponse;

use crate::models::UserSummary;
use crate::services::oauth_service::{self, ProviderSettings};
use crate::services::token_service;
use crate::AppState;

/// How long an issued `state` value stays redeemable.
const STATE_TTL_SECS: u64 = 600;

fn parse_provider(raw: &str) -> Result<OAuthProvider, AppError> {
    raw.parse()
        .map_err(|e: String| AppError::new(ErrorCode::UnsupportedProvider, e))
}

fn state_key(state: &str) -> String {
    format!("atrium:oauth_state:{state}")
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub url: String,
    pub state: String,
}

pub async fn authorize(
    Path(provider): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<AuthorizeResponse>>> {
    let provider = parse_provider(&provider)?;
    let settings = ProviderSettings::for_provider(provider, &state.config)?;

    let csrf_state = token_service::random_token();
    let url = oauth_service::authorize_url(provider, &settings, &csrf_state)?;

    if let Err(e) = state
        .redis
        .set(&state_key(&csrf_state), provider.as_str(), STATE_TTL_SECS)
        .await
    {
        tracing::warn!(error = %e, "failed to persist oauth state");
    }

    Ok(Json(ApiResponse::ok(AuthorizeResponse { url, state: csrf_state })))
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackRequest {
    pub code: String,
    /// Echo of the `state` from the authorize step. Checked when present.
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OAuthResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserSummary,
    pub is_new_user: bool,
}

async fn consume_state(app: &AppState, provider: OAuthProvider, value: &str) -> Result<(), AppError> {
    let key = state_key(value);
    let stored = app
        .redis
        .get(&key)
        .await
        .map_err(|e| AppError::internal(format!("oauth state lookup: {e}")))?;

    if stored.as_deref() != Some(provider.as_str()) {
        return Err(AppError::new(ErrorCode::OAuthError, "invalid or expired oauth state"));
    }
    if let Err(e) = app.redis.del(&key).await {
        tracing::warn!(error = %e, "failed to delete oauth state");
    }
    Ok(())
}

pub async fn oauth_callback(
    Path(provider): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<OAuthCallbackRequest>,
) -> AppResult<Json<ApiResponse<OAuthResponse>>> {
    let provider = parse_provider(&provider)?;
    let settings = ProviderSettings::for_provider(provider, &state.config)?;

    if let Some(value) = req.state.as_deref() {
        consume_state(&state, provider, value).await?;
    }

    let provider_tokens = oauth_service::exchange_code(&state.http, provider, &settings, &req.code).await?;
    let profile = oauth_service::fetch_profile(&state.http, provider, &provider_tokens.access_token).await?;

    let mut conn = get_conn(&state.db)?;
    let (user, is_new_user) =
        oauth_service::link_or_create_user(&mut conn, provider, &profile, &provider_tokens)?;
    let tokens = token_service::issue_session(&mut conn, user.id, &user.email, &state.config)?;

    if is_new_user {
        metrics::counter!("atrium_signups_total", "method" => provider.as_str()).increment(1);
    }
    tracing::info!(user_id = %user.id, provider = %provider, is_new = is_new_user, "oauth login");

    Ok(Json(ApiResponse::ok(OAuthResponse {
        tokens,
        user: UserSummary::from(&user),
        is_new_user,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!(parse_provider("GitHub").unwrap(), OAuthProvider::Github);
        assert_eq!(parse_provider("google").unwrap(), OAuthProvider::Google);
        let err = parse_provider("myspace").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::UnsupportedProvider);
    }

    #[test]
    fn callback_state_is_optional() {
        let req: OAuthCallbackRequest = serde_json::from_str(r#"{"code":"abc"}"#).unwrap();
        assert_eq!(req.code, "abc");
        assert!(req.state.is_none());
    }
}
