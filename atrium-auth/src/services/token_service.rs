use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use atrium_shared::errors::AppError;
use atrium_shared::types::auth::{Claims, TokenPair};

use crate::config::AppConfig;
use crate::models::NewRefreshToken;
use crate::schema::refresh_tokens;

pub fn create_access_token(
    user_id: Uuid,
    email: &str,
    secret: &str,
    ttl_secs: i64,
) -> Result<String, AppError> {
    let claims = Claims::new(user_id, email, ttl_secs);
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(format!("JWT encoding failed: {e}")))
}

/// 32 random bytes, hex encoded. Used for refresh tokens and reset links.
pub fn random_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn create_token_pair(
    user_id: Uuid,
    email: &str,
    secret: &str,
    access_ttl: i64,
) -> Result<(TokenPair, String), AppError> {
    let access_token = create_access_token(user_id, email, secret, access_ttl)?;
    let refresh_token = random_token();
    let refresh_hash = hash_token(&refresh_token);
    let pair = TokenPair::new(access_token, refresh_token, access_ttl);
    Ok((pair, refresh_hash))
}

/// Mint a token pair and persist the hashed refresh token.
pub fn issue_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    email: &str,
    config: &AppConfig,
) -> Result<TokenPair, AppError> {
    let (token_pair, refresh_hash) =
        create_token_pair(user_id, email, &config.jwt_secret, config.jwt_access_ttl)?;

    let new_rt = NewRefreshToken {
        user_id,
        token_hash: refresh_hash,
        expires_at: Utc::now() + Duration::seconds(config.jwt_refresh_ttl),
    };
    diesel::insert_into(refresh_tokens::table)
        .values(&new_rt)
        .execute(conn)?;

    Ok(token_pair)
}

/// Revoke every live refresh token of `user_id`. Returns how many were revoked.
pub fn revoke_all_sessions(conn: &mut PgConnection, user_id: Uuid) -> Result<usize, AppError> {
    let revoked = diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::user_id.eq(user_id))
            .filter(refresh_tokens::revoked_at.is_null()),
    )
    .set(refresh_tokens::revoked_at.eq(Some(Utc::now())))
    .execute(conn)?;
    Ok(revoked)
}
