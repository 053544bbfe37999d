/// Access credential issuing and verification
///
/// Access credentials are HS256 JWTs verified without touching the store.
/// The embedded `ver` claim lets a caller that knows the user's current
/// token version reject every credential issued before a version bump.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::configuration::JwtSettings;
use crate::error::{AppError, TokenRejection};

/// Signed access credential as handed to the client
#[derive(Debug, Clone)]
pub struct AccessCredential {
    pub token: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    config: JwtSettings,
}

impl TokenIssuer {
    pub fn new(config: JwtSettings) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            config,
        }
    }

    /// Mint an access credential for a user
    ///
    /// # Errors
    /// Returns error if token encoding fails
    pub fn issue(
        &self,
        user_id: Uuid,
        roles: &[String],
        token_version: i32,
    ) -> Result<AccessCredential, AppError> {
        let claims = Claims::new(
            user_id,
            roles.to_vec(),
            token_version,
            self.config.access_token_expiry,
            self.config.issuer.clone(),
            self.config.audience.clone(),
        );

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok(AccessCredential {
            token,
            expires_in: self.config.access_token_expiry,
        })
    }

    /// Verify signature, expiry, issuer and audience, and the token version
    /// when `expected_version` is supplied.
    ///
    /// # Errors
    /// Returns `InvalidToken` for every failure
    pub fn verify(&self, token: &str, expected_version: Option<i32>) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let reason = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenRejection::Expired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        TokenRejection::BadSignature
                    }
                    _ => TokenRejection::Malformed,
                };
                tracing::debug!(error = %e, reason = %reason, "JWT validation error");
                AppError::invalid_token(reason)
            })?;

        if let Some(expected) = expected_version {
            self.ensure_version(&claims, expected)?;
        }

        Ok(claims)
    }

    /// Reject claims minted before the user's latest version bump
    pub fn ensure_version(&self, claims: &Claims, current_version: i32) -> Result<(), AppError> {
        if claims.ver != current_version {
            tracing::info!(
                user_id = %claims.sub,
                token_version = claims.ver,
                current_version,
                "Stale access credential"
            );
            return Err(AppError::invalid_token(TokenRejection::VersionMismatch));
        }
        Ok(())
    }

    pub fn refresh_token_expiry(&self) -> i64 {
        self.config.refresh_token_expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
            audience: "test-client".to_string(),
        }
    }

    fn rejection(result: Result<Claims, AppError>) -> TokenRejection {
        match result {
            Err(AppError::Auth(AuthError::InvalidToken(reason))) => reason,
            other => panic!("expected token rejection, got {:?}", other.map(|c| c.sub)),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = TokenIssuer::new(get_test_config());
        let user_id = Uuid::new_v4();
        let roles = vec!["clerk".to_string()];

        let credential = issuer.issue(user_id, &roles, 1).expect("Failed to issue token");
        let claims = issuer
            .verify(&credential.token, Some(1))
            .expect("Failed to verify token");

        assert_eq!(credential.expires_in, 3600);
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.roles, roles);
        assert_eq!(claims.iss, "test");
        assert_eq!(claims.aud, "test-client");
    }

    #[test]
    fn test_stale_version_rejected() {
        let issuer = TokenIssuer::new(get_test_config());
        let credential = issuer.issue(Uuid::new_v4(), &[], 1).unwrap();

        // Signature and expiry are still fine; only the version is stale
        assert!(issuer.verify(&credential.token, None).is_ok());
        assert_eq!(
            rejection(issuer.verify(&credential.token, Some(2))),
            TokenRejection::VersionMismatch
        );
    }

    #[test]
    fn test_invalid_token() {
        let issuer = TokenIssuer::new(get_test_config());
        assert!(issuer.verify("invalid.token.here", None).is_err());
    }

    #[test]
    fn test_tampered_token() {
        let issuer = TokenIssuer::new(get_test_config());
        let credential = issuer.issue(Uuid::new_v4(), &[], 0).unwrap();

        let tampered = format!("{}X", credential.token);
        assert!(issuer.verify(&tampered, None).is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let issuer = TokenIssuer::new(get_test_config());
        let credential = issuer.issue(Uuid::new_v4(), &[], 0).unwrap();

        let mut other = get_test_config();
        other.secret = "another-secret-key-at-least-32-characters".to_string();
        let result = TokenIssuer::new(other).verify(&credential.token, None);
        assert_eq!(rejection(result), TokenRejection::BadSignature);
    }

    #[test]
    fn test_wrong_issuer_and_audience() {
        let issuer = TokenIssuer::new(get_test_config());
        let credential = issuer.issue(Uuid::new_v4(), &[], 0).unwrap();

        let mut config = get_test_config();
        config.issuer = "wrong-issuer".to_string();
        assert!(TokenIssuer::new(config).verify(&credential.token, None).is_err());

        let mut config = get_test_config();
        config.audience = "wrong-audience".to_string();
        assert!(TokenIssuer::new(config).verify(&credential.token, None).is_err());
    }

    #[test]
    fn test_expired_token() {
        let mut config = get_test_config();
        config.access_token_expiry = -10;
        let issuer = TokenIssuer::new(config);
        let credential = issuer.issue(Uuid::new_v4(), &[], 0).unwrap();

        assert_eq!(
            rejection(issuer.verify(&credential.token, None)),
            TokenRejection::Expired
        );
    }
}
