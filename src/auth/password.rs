/// Password Hashing and Verification
///
/// New hashes use Argon2id. Hashes written by the previous bcrypt-based
/// deployment keep verifying without a forced migration; whether to rehash
/// after a successful legacy match is left to the caller.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::fmt;

use crate::error::{AppError, ValidationError};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;

/// Argon2id hash of a random string, verified against when the account does
/// not exist so both failure paths cost one verification.
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$1zG7VTpmHRxb8jmeE6YS9LbH9P0dUFcJpZSl2YbZvqU";

/// Hash scheme tag stored next to each password hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordScheme {
    /// Current default
    Argon2,
    /// Legacy, verify-only
    Bcrypt,
}

impl PasswordScheme {
    pub const CURRENT: PasswordScheme = PasswordScheme::Argon2;

    pub fn as_str(&self) -> &'static str {
        match self {
            PasswordScheme::Argon2 => "argon2",
            PasswordScheme::Bcrypt => "bcrypt",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "argon2" => Some(PasswordScheme::Argon2),
            "bcrypt" => Some(PasswordScheme::Bcrypt),
            _ => None,
        }
    }

    /// Whether a hash under this scheme should be rewritten with `CURRENT`
    pub fn needs_rehash(&self) -> bool {
        *self != Self::CURRENT
    }
}

impl fmt::Display for PasswordScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hash a password with the current scheme
///
/// # Errors
/// Returns error if:
/// - Password fails validation (too short, weak, etc.)
/// - Hashing fails
pub fn hash_password(password: &str) -> Result<(String, PasswordScheme), AppError> {
    validate_password_strength(password)?;

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

    Ok((hash.to_string(), PasswordScheme::CURRENT))
}

/// Verify a password against a stored hash of the given scheme.
///
/// A stored hash that cannot be parsed is reported as a mismatch; the
/// caller only ever learns "matches" or "does not match".
pub fn verify_password(password: &str, stored_hash: &str, scheme: PasswordScheme) -> bool {
    match scheme {
        PasswordScheme::Argon2 => match PasswordHash::new(stored_hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::error!(error = %e, "Stored argon2 hash is malformed");
                false
            }
        },
        PasswordScheme::Bcrypt => bcrypt::verify(password, stored_hash).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Stored bcrypt hash is malformed");
            false
        }),
    }
}

/// Burn one verification for a login whose account does not exist
pub fn verify_against_dummy(password: &str) {
    let _ = verify_password(password, DUMMY_HASH, PasswordScheme::Argon2);
}

/// Validate password strength requirements
///
/// Requirements:
/// - 8 to 128 characters
/// - At least one digit, one lowercase and one uppercase letter
fn validate_password_strength(password: &str) -> Result<(), AppError> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(ValidationError::TooShort(
            "password".to_string(),
            MIN_PASSWORD_LENGTH,
        )));
    }

    if length > MAX_PASSWORD_LENGTH {
        return Err(AppError::Validation(ValidationError::TooLong(
            "password".to_string(),
            MAX_PASSWORD_LENGTH,
        )));
    }

    let has_digit = password.chars().any(|c| c.is_numeric());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_uppercase());

    if !has_digit || !has_lowercase || !has_uppercase {
        return Err(AppError::Validation(ValidationError::InvalidFormat(
            "password must contain at least one digit, one lowercase letter, and one uppercase letter"
                .to_string(),
        )));
    }

    Ok(())
}
