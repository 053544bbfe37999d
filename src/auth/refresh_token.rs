/// Refresh credential primitives
///
/// The credential handed to clients is the composite `<id>.<secret>`:
/// - `id` is the token's UUID in simple (hex) form; not secret, safe to log
/// - `secret` is 64 random alphanumeric characters; never stored or logged
///
/// The server keeps only the SHA-256 hash of the secret, so a leaked row
/// cannot be turned back into a usable credential.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{AppError, TokenRejection};

const SECRET_LENGTH: usize = 64;

/// Generate the random half of a refresh credential
pub fn generate_refresh_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest of a raw secret
pub fn hash_refresh_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Constant-time comparison of a presented secret against a stored hash
pub fn secret_matches(secret: &str, stored_hash: &str) -> bool {
    let computed = hash_refresh_secret(secret);
    bool::from(computed.as_bytes().ct_eq(stored_hash.as_bytes()))
}

/// A parsed `<id>.<secret>` refresh credential.
///
/// `Debug` and `Display` never print the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct CompositeToken {
    pub id: Uuid,
    secret: String,
}

impl CompositeToken {
    pub fn new(id: Uuid, secret: String) -> Self {
        Self { id, secret }
    }

    /// Parse the wire form.
    ///
    /// # Errors
    /// `InvalidToken(Malformed)` unless the input is a UUID, one dot, and a
    /// secret of the expected shape.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let malformed = || AppError::invalid_token(TokenRejection::Malformed);

        let (id, secret) = raw.trim().split_once('.').ok_or_else(malformed)?;
        let id = Uuid::parse_str(id).map_err(|_| malformed())?;

        if secret.len() != SECRET_LENGTH || !secret.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed());
        }

        Ok(Self {
            id,
            secret: secret.to_string(),
        })
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Wire form handed to the client
    pub fn encode(&self) -> String {
        format!("{}.{}", self.id.simple(), self.secret)
    }
}

impl fmt::Debug for CompositeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeToken")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for CompositeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.<redacted>", self.id.simple())
    }
}
