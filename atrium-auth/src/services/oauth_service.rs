use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::PgConnection;
use reqwest::Client;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use atrium_shared::errors::{AppError, ErrorCode};
use atrium_shared::types::auth::OAuthProvider;

use crate::config::AppConfig;
use crate::models::{Account, NewAccount, NewUser, User};
use crate::schema::{accounts, users};
use crate::services::auth_service;

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("atrium-auth/", env!("CARGO_PKG_VERSION"));

/// Client registration for one provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl ProviderSettings {
    pub fn for_provider(provider: OAuthProvider, config: &AppConfig) -> Result<Self, AppError> {
        let settings = match provider {
            OAuthProvider::Google => Self {
                client_id: config.google_client_id.clone(),
                client_secret: config.google_client_secret.clone(),
                redirect_uri: config.google_redirect_uri.clone(),
            },
            OAuthProvider::Github => Self {
                client_id: config.github_client_id.clone(),
                client_secret: config.github_client_secret.clone(),
                redirect_uri: config.github_redirect_uri.clone(),
            },
        };
        if settings.client_id.is_empty() {
            return Err(AppError::new(
                ErrorCode::UnsupportedProvider,
                format!("{provider} sign-in is not configured"),
            ));
        }
        Ok(settings)
    }
}

/// Identity returned by a provider after a successful code exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthProfile {
    pub provider_account_id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

fn oauth_error(message: impl Into<String>) -> AppError {
    AppError::new(ErrorCode::OAuthError, message)
}

fn authorize_endpoint(provider: OAuthProvider) -> &'static str {
    match provider {
        OAuthProvider::Google => "https://accounts.google.com/o/oauth2/v2/auth",
        OAuthProvider::Github => "https://github.com/login/oauth/authorize",
    }
}

fn token_endpoint(provider: OAuthProvider) -> &'static str {
    match provider {
        OAuthProvider::Google => "https://oauth2.googleapis.com/token",
        OAuthProvider::Github => "https://github.com/login/oauth/access_token",
    }
}

fn scopes(provider: OAuthProvider) -> &'static str {
    match provider {
        OAuthProvider::Google => "openid email profile",
        OAuthProvider::Github => "read:user user:email",
    }
}

pub fn authorize_url(provider: OAuthProvider, settings: &ProviderSettings, state: &str) -> Result<String, AppError> {
    let mut url = Url::parse(authorize_endpoint(provider))
        .map_err(|e| AppError::internal(format!("bad authorize endpoint: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", &settings.client_id)
        .append_pair("redirect_uri", &settings.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", scopes(provider))
        .append_pair("state", state);
    Ok(url.into())
}

pub async fn exchange_code(
    client: &Client,
    provider: OAuthProvider,
    settings: &ProviderSettings,
    code: &str,
) -> Result<OAuthTokens, AppError> {
    let response = client
        .post(token_endpoint(provider))
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("code", code),
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.as_str()),
            ("redirect_uri", settings.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(|e| oauth_error(format!("{provider} token exchange failed: {e}")))?;

    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(oauth_error(format!("{provider} token error: {body}")));
    }

    // GitHub answers 200 with an `error` field for bad codes.
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| oauth_error(format!("invalid token response: {e}")))?;
    if let Some(error) = body.get("error").and_then(|e| e.as_str()) {
        return Err(oauth_error(format!("{provider} token error: {error}")));
    }

    serde_json::from_value(body).map_err(|e| oauth_error(format!("invalid token response: {e}")))
}

pub async fn fetch_profile(
    client: &Client,
    provider: OAuthProvider,
    access_token: &str,
) -> Result<OAuthProfile, AppError> {
    match provider {
        OAuthProvider::Google => fetch_google_profile(client, access_token).await,
        OAuthProvider::Github => fetch_github_profile(client, access_token).await,
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

impl GoogleUserInfo {
    fn into_profile(self) -> Result<OAuthProfile, AppError> {
        let email = self.email.ok_or_else(|| oauth_error("google account has no email"))?;
        Ok(OAuthProfile {
            provider_account_id: self.sub,
            email,
            email_verified: self.email_verified,
            name: self.name,
            avatar_url: self.picture,
        })
    }
}

async fn fetch_google_profile(client: &Client, access_token: &str) -> Result<OAuthProfile, AppError> {
    let info: GoogleUserInfo = client
        .get("https://www.googleapis.com/oauth2/v3/userinfo")
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| oauth_error(format!("google userinfo failed: {e}")))?
        .error_for_status()
        .map_err(|e| oauth_error(format!("google userinfo failed: {e}")))?
        .json()
        .await
        .map_err(|e| oauth_error(format!("invalid userinfo response: {e}")))?;

    info.into_profile()
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// Primary verified address, else any verified one.
fn pick_github_email(emails: &[GithubEmail]) -> Option<&GithubEmail> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
}

async fn github_get<T: serde::de::DeserializeOwned>(
    client: &Client,
    path: &str,
    access_token: &str,
) -> Result<T, AppError> {
    client
        .get(format!("{GITHUB_API}{path}"))
        .bearer_auth(access_token)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .send()
        .await
        .map_err(|e| oauth_error(format!("github {path} failed: {e}")))?
        .error_for_status()
        .map_err(|e| oauth_error(format!("github {path} failed: {e}")))?
        .json()
        .await
        .map_err(|e| oauth_error(format!("invalid github {path} response: {e}")))
}

async fn fetch_github_profile(client: &Client, access_token: &str) -> Result<OAuthProfile, AppError> {
    let user: GithubUser = github_get(client, "/user", access_token).await?;

    // The public profile email is not necessarily verified, so always consult
    // the emails endpoint for the verification flag.
    let emails: Vec<GithubEmail> = github_get(client, "/user/emails", access_token).await?;
    let (email, email_verified) = match pick_github_email(&emails) {
        Some(found) => (found.email.clone(), true),
        None => match user.email {
            Some(public) => (public, false),
            None => return Err(oauth_error("github account has no email")),
        },
    };

    Ok(OAuthProfile {
        provider_account_id: user.id.to_string(),
        email,
        email_verified,
        name: user.name.or(Some(user.login)),
        avatar_url: user.avatar_url,
    })
}

/// How a provider identity maps onto local rows.
#[derive(Debug, PartialEq)]
pub enum LinkPlan {
    /// Already linked; only the stored provider tokens change.
    Linked { account_id: Uuid, user_id: Uuid },
    /// Attach to the local user registered under the same email.
    Attach {
        user_id: Uuid,
        email_verified: DateTime<Utc>,
        image: Option<String>,
    },
    Create(NewUser),
}

/// An existing link wins, then a user with the same email (only when the
/// provider vouches for the address), and otherwise a new password-less user.
pub fn plan_link(
    provider: OAuthProvider,
    linked: Option<&Account>,
    existing: Option<&User>,
    profile: &OAuthProfile,
    now: DateTime<Utc>,
) -> Result<LinkPlan, AppError> {
    if let Some(account) = linked {
        return Ok(LinkPlan::Linked {
            account_id: account.id,
            user_id: account.user_id,
        });
    }

    let email = auth_service::normalize_email(&profile.email);
    match existing {
        Some(user) => {
            if !profile.email_verified {
                return Err(oauth_error(format!(
                    "{provider} has not verified {email}; sign in with your password instead"
                )));
            }
            // The provider confirmed ownership, so fill what the local row lacks.
            Ok(LinkPlan::Attach {
                user_id: user.id,
                email_verified: user.email_verified.unwrap_or(now),
                image: user.image.clone().or_else(|| profile.avatar_url.clone()),
            })
        }
        None => Ok(LinkPlan::Create(NewUser {
            name: profile.name.clone(),
            email,
            password_hash: None,
            email_verified: profile.email_verified.then_some(now),
            image: profile.avatar_url.clone(),
        })),
    }
}

/// A concurrent first sign-in for the same identity or email won the unique index.
fn sign_in_conflict(e: DieselError) -> AppError {
    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => AppError::new(
            ErrorCode::EmailAlreadyExists,
            "this account was just linked by another sign-in, please retry",
        ),
        other => other.into(),
    }
}

/// Resolve the local user for a provider identity and store the provider
/// tokens. Returns `(user, is_new_user)`.
pub fn link_or_create_user(
    conn: &mut PgConnection,
    provider: OAuthProvider,
    profile: &OAuthProfile,
    tokens: &OAuthTokens,
) -> Result<(User, bool), AppError> {
    let now = Utc::now();
    let token_expiry = tokens.expires_in.map(|secs| now + Duration::seconds(secs));

    conn.transaction::<_, AppError, _>(|conn| {
        let linked: Option<Account> = accounts::table
            .filter(accounts::provider.eq(provider.as_str()))
            .filter(accounts::provider_account_id.eq(&profile.provider_account_id))
            .select(Account::as_select())
            .first(conn)
            .optional()?;

        let existing: Option<User> = match linked {
            Some(_) => None,
            None => users::table
                .filter(users::email.eq(auth_service::normalize_email(&profile.email)))
                .select(User::as_select())
                .first(conn)
                .optional()?,
        };

        let (user, is_new_user) = match plan_link(provider, linked.as_ref(), existing.as_ref(), profile, now)? {
            LinkPlan::Linked { account_id, user_id } => {
                diesel::update(accounts::table.find(account_id))
                    .set((
                        accounts::access_token.eq(Some(tokens.access_token.clone())),
                        accounts::refresh_token.eq(tokens.refresh_token.clone()),
                        accounts::expires_at.eq(token_expiry),
                    ))
                    .execute(conn)?;
                let user = users::table
                    .find(user_id)
                    .select(User::as_select())
                    .first(conn)?;
                return Ok((user, false));
            }
            LinkPlan::Attach { user_id, email_verified, image } => {
                let user = diesel::update(users::table.find(user_id))
                    .set((
                        users::email_verified.eq(Some(email_verified)),
                        users::image.eq(image),
                        users::updated_at.eq(now),
                    ))
                    .returning(User::as_returning())
                    .get_result(conn)?;
                (user, false)
            }
            LinkPlan::Create(new_user) => {
                let user = diesel::insert_into(users::table)
                    .values(&new_user)
                    .returning(User::as_returning())
                    .get_result(conn)
                    .map_err(sign_in_conflict)?;
                (user, true)
            }
        };

        diesel::insert_into(accounts::table)
            .values(&NewAccount {
                user_id: user.id,
                provider: provider.as_str().to_string(),
                provider_account_id: profile.provider_account_id.clone(),
                access_token: Some(tokens.access_token.clone()),
                refresh_token: tokens.refresh_token.clone(),
                expires_at: token_expiry,
            })
            .execute(conn)
            .map_err(sign_in_conflict)?;

        Ok((user, is_new_user))
    })
}
