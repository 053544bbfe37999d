/// JWT Claims structure
///
/// Payload of an access credential: identity, authorization roles and the
/// user's token version at issue time, plus the standard RFC 7519 claims.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, TokenRejection};

/// JWT Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Token version of the user when the credential was issued
    pub ver: i32,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Authorization roles
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Claims {
    /// Create new claims expiring `expiry_seconds` from now
    pub fn new(
        user_id: Uuid,
        roles: Vec<String>,
        token_version: i32,
        expiry_seconds: i64,
        issuer: String,
        audience: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            ver: token_version,
            iat: now,
            exp: now + expiry_seconds,
            iss: issuer,
            aud: audience,
            roles,
        }
    }

    /// Extract user ID from claims
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::invalid_token(TokenRejection::Malformed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_for(user_id: Uuid) -> Claims {
        Claims::new(
            user_id,
            vec!["approver".to_string()],
            3,
            3600,
            "test".to_string(),
            "client".to_string(),
        )
    }

    #[test]
    fn test_claims_creation() {
        let user_id = Uuid::new_v4();
        let claims = claims_for(user_id);

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.ver, 3);
        assert_eq!(claims.aud, "client");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert_eq!(claims.roles, vec!["approver".to_string()]);
    }

    #[test]
    fn test_user_id_extraction() {
        let user_id = Uuid::new_v4();
        assert_eq!(claims_for(user_id).user_id().unwrap(), user_id);
    }

    #[test]
    fn test_invalid_user_id() {
        let mut claims = claims_for(Uuid::new_v4());
        claims.sub = "invalid-uuid".to_string();

        assert!(claims.user_id().is_err());
    }
}
