use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::sync::OnceLock;

use atrium_shared::errors::{AppError, ErrorCode};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::internal(format!("invalid password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Spends the same argon2 work as a real check for callers with no hash to
/// verify against, so unknown emails answer in comparable time. Always fails.
pub fn verify_against_dummy(password: &str) -> bool {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();
    let hash = DUMMY_HASH.get_or_init(|| hash_password("atrium-timing-equalizer").ok());
    if let Some(hash) = hash {
        let _ = verify_password(password, hash);
    }
    false
}

/// Policy applied at sign-up: length only.
pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::new(
            ErrorCode::PasswordTooWeak,
            format!("password must be at least {MIN_PASSWORD_LEN} characters long"),
        ));
    }
    Ok(())
}

/// Policy applied when a password is reset or changed.
pub fn validate_strong_password(password: &str) -> Result<(), AppError> {
    validate_password(password)?;

    let rules: [(fn(&char) -> bool, &str); 4] = [
        (char::is_ascii_uppercase, "password must contain at least one uppercase letter"),
        (char::is_ascii_lowercase, "password must contain at least one lowercase letter"),
        (char::is_ascii_digit, "password must contain at least one number"),
        (|c| !c.is_ascii_alphanumeric(), "password must contain at least one special character"),
    ];

    for (check, message) in rules {
        if !password.chars().any(|c| check(&c)) {
            return Err(AppError::new(ErrorCode::PasswordTooWeak, message));
        }
    }
    Ok(())
}

pub fn ensure_passwords_match(password: &str, confirmation: &str) -> Result<(), AppError> {
    if password != confirmation {
        return Err(AppError::new(ErrorCode::PasswordMismatch, "passwords do not match"));
    }
    Ok(())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_of(err: AppError) -> ErrorCode {
        err.error_code()
    }

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn dummy_verification_never_succeeds() {
        assert!(!verify_against_dummy("whatever"));
        assert!(!verify_against_dummy("atrium-timing-equalizer"));
    }

    #[test]
    fn malformed_hash_is_internal_error() {
        let err = verify_password("x", "not-a-phc-string").unwrap_err();
        assert_eq!(code_of(err), ErrorCode::InternalError);
    }

    #[test]
    fn signup_policy_is_length_only() {
        assert!(validate_password("abcdefgh").is_ok());
        assert_eq!(code_of(validate_password("short").unwrap_err()), ErrorCode::PasswordTooWeak);
    }

    #[test]
    fn strong_policy_requires_every_class() {
        assert!(validate_strong_password("Sup3r$ecret").is_ok());
        for weak in ["sup3r$ecret", "SUP3R$ECRET", "Super$ecret", "Sup3rSecret", "S3$a"] {
            assert!(validate_strong_password(weak).is_err(), "{weak} should be rejected");
        }
    }

    #[test]
    fn confirmation_must_match() {
        assert!(ensure_passwords_match("a", "a").is_ok());
        assert_eq!(
            code_of(ensure_passwords_match("a", "b").unwrap_err()),
            ErrorCode::PasswordMismatch
        );
    }

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}
