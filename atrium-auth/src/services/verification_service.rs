//! One-time tokens stored in `verification_tokens`: 6-digit email codes and
//! password reset tokens. A token is redeemed by deleting its row, so the
//! database guarantees it is used at most once.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use rand::Rng;

use atrium_shared::errors::{AppError, ErrorCode};

use crate::models::{NewVerificationToken, TokenPurpose, VerificationToken};
use crate::schema::verification_tokens;
use crate::services::token_service;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Invalid,
    Expired,
}

impl TokenRejection {
    pub fn into_app_error(self, purpose: TokenPurpose) -> AppError {
        match (purpose, self) {
            (TokenPurpose::EmailVerification, TokenRejection::Invalid) => {
                AppError::new(ErrorCode::VerificationCodeInvalid, "invalid verification code")
            }
            (TokenPurpose::EmailVerification, TokenRejection::Expired) => {
                AppError::new(ErrorCode::VerificationCodeExpired, "verification code expired")
            }
            (TokenPurpose::PasswordReset, TokenRejection::Invalid) => {
                AppError::new(ErrorCode::ResetCodeInvalid, "invalid or expired reset token")
            }
            (TokenPurpose::PasswordReset, TokenRejection::Expired) => {
                AppError::new(ErrorCode::ResetCodeExpired, "invalid or expired reset token")
            }
        }
    }
}

pub fn generate_verification_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

/// Replace any outstanding token of `purpose` for `identifier` with `token`.
pub fn store_token(
    conn: &mut PgConnection,
    identifier: &str,
    token: &str,
    purpose: TokenPurpose,
    ttl: Duration,
) -> Result<DateTime<Utc>, AppError> {
    let expires = Utc::now() + ttl;

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::delete(
            verification_tokens::table
                .filter(verification_tokens::identifier.eq(identifier))
                .filter(verification_tokens::purpose.eq(purpose.as_str())),
        )
        .execute(conn)?;

        diesel::insert_into(verification_tokens::table)
            .values(&NewVerificationToken {
                identifier: identifier.to_string(),
                token: token.to_string(),
                purpose: purpose.as_str().to_string(),
                expires,
            })
            .execute(conn)?;
        Ok(())
    })?;

    Ok(expires)
}

pub fn issue_email_code(conn: &mut PgConnection, email: &str, ttl_minutes: i64) -> Result<String, AppError> {
    let code = generate_verification_code();
    store_token(conn, email, &code, TokenPurpose::EmailVerification, Duration::minutes(ttl_minutes))?;
    Ok(code)
}

pub fn issue_reset_token(conn: &mut PgConnection, email: &str, ttl_minutes: i64) -> Result<String, AppError> {
    let token = token_service::random_token();
    store_token(conn, email, &token, TokenPurpose::PasswordReset, Duration::minutes(ttl_minutes))?;
    Ok(token)
}

/// Consume `token`. When `identifier` is given the token must belong to it.
/// The row is deleted whether or not it is still valid.
pub fn redeem(
    conn: &mut PgConnection,
    identifier: Option<&str>,
    token: &str,
    purpose: TokenPurpose,
) -> Result<Result<VerificationToken, TokenRejection>, AppError> {
    let matching = verification_tokens::table
        .filter(verification_tokens::token.eq(token))
        .filter(verification_tokens::purpose.eq(purpose.as_str()));

    let deleted: Vec<VerificationToken> = match identifier {
        Some(identifier) => diesel::delete(matching.filter(verification_tokens::identifier.eq(identifier)))
            .returning(VerificationToken::as_returning())
            .get_results(conn)?,
        None => diesel::delete(matching)
            .returning(VerificationToken::as_returning())
            .get_results(conn)?,
    };

    Ok(select_redeemable(deleted, Utc::now()))
}

fn select_redeemable(
    rows: Vec<VerificationToken>,
    now: DateTime<Utc>,
) -> Result<VerificationToken, TokenRejection> {
    let mut saw_expired = false;
    for row in rows {
        if row.is_expired_at(now) {
            saw_expired = true;
        } else {
            return Ok(row);
        }
    }
    Err(if saw_expired { TokenRejection::Expired } else { TokenRejection::Invalid })
}

pub fn purge_expired(conn: &mut PgConnection) -> Result<usize, AppError> {
    let removed = diesel::delete(verification_tokens::table.filter(verification_tokens::expires.le(Utc::now())))
        .execute(conn)?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(expires: DateTime<Utc>) -> VerificationToken {
        VerificationToken {
            identifier: "ada@example.com".into(),
            token: "123456".into(),
            purpose: TokenPurpose::EmailVerification.as_str().into(),
            expires,
            created_at: expires - Duration::minutes(15),
        }
    }

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..1000 {
            let code = generate_verification_code();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[test]
    fn nothing_deleted_is_invalid() {
        assert_eq!(select_redeemable(vec![], Utc::now()).unwrap_err(), TokenRejection::Invalid);
    }

    #[test]
    fn expired_row_is_rejected() {
        let now = Utc::now();
        let err = select_redeemable(vec![row(now - Duration::seconds(1))], now).unwrap_err();
        assert_eq!(err, TokenRejection::Expired);
    }

    #[test]
    fn live_row_wins_over_expired_duplicate() {
        let now = Utc::now();
        let rows = vec![row(now - Duration::minutes(1)), row(now + Duration::minutes(5))];
        let redeemed = select_redeemable(rows, now).unwrap();
        assert!(redeemed.expires > now);
    }

    #[test]
    fn rejections_map_per_purpose() {
        assert_eq!(
            TokenRejection::Expired.into_app_error(TokenPurpose::EmailVerification).error_code(),
            ErrorCode::VerificationCodeExpired
        );
        assert_eq!(
            TokenRejection::Invalid.into_app_error(TokenPurpose::PasswordReset).error_code(),
            ErrorCode::ResetCodeInvalid
        );
    }
}
