use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{accounts, refresh_tokens, users, verification_tokens};

// --- Users ---

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_verified(&self) -> bool {
        self.email_verified.is_some()
    }

    /// Accounts created through OAuth have no local password.
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Public view of a user returned alongside fresh sessions.
#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub email_verified: bool,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            email_verified: user.is_verified(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub name: Option<String>,
    pub email: String,
    pub password_hash: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
    pub image: Option<String>,
}

// --- OAuth accounts ---

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = accounts)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_account_id: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = accounts)]
pub struct NewAccount {
    pub user_id: Uuid,
    pub provider: String,
    pub provider_account_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

// --- Verification tokens ---

/// What a row in `verification_tokens` may be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::EmailVerification => "email_verification",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = verification_tokens)]
pub struct VerificationToken {
    pub identifier: String,
    pub token: String,
    pub purpose: String,
    pub expires: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl VerificationToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = verification_tokens)]
pub struct NewVerificationToken {
    pub identifier: String,
    pub token: String,
    pub purpose: String,
    pub expires: DateTime<Utc>,
}

// --- Refresh tokens ---

#[derive(Debug, Queryable, Selectable, Identifiable)]
#[diesel(table_name = refresh_tokens)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn token_expiry_boundary() {
        let now = Utc::now();
        let token = VerificationToken {
            identifier: "a@b.dev".into(),
            token: "123456".into(),
            purpose: TokenPurpose::EmailVerification.as_str().into(),
            expires: now,
            created_at: now - Duration::minutes(15),
        };
        assert!(token.is_expired_at(now));
        assert!(!token.is_expired_at(now - Duration::seconds(1)));
    }

    #[test]
    fn summary_hides_password() {
        let now = Utc::now();
        let user = User {
            id: Uuid::now_v7(),
            name: Some("Ada".into()),
            email: "ada@example.com".into(),
            password_hash: Some("$argon2id$secret".into()),
            email_verified: None,
            image: None,
            created_at: now,
            updated_at: now,
        };
        assert!(user.has_password());
        let summary = serde_json::to_value(UserSummary::from(&user)).unwrap();
        assert_eq!(summary["email_verified"], false);
        assert!(summary.get("password_hash").is_none());
        assert!(!serde_json::to_string(&user).unwrap().contains("argon2"));
    }

    #[test]
    fn purpose_strings_match_schema_check() {
        assert_eq!(TokenPurpose::EmailVerification.as_str(), "email_verification");
        assert_eq!(TokenPurpose::PasswordReset.as_str(), "password_reset");
    }
}
