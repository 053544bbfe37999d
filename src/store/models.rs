/// Persistent records owned by the session service.
///
/// Refresh tokens are immutable apart from the one-way `revoked` flip;
/// sessions likewise only ever move from live to revoked.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::auth::PasswordScheme;

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub hash_scheme: PasswordScheme,
    pub roles: Vec<String>,
    pub token_version: i32,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, password_hash: String, hash_scheme: PasswordScheme, roles: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            hash_scheme,
            roles,
            token_version: 0,
            created_at: Utc::now(),
        }
    }
}

/// Why a session or refresh token left the live state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokedReason {
    Rotated,
    ReuseDetected,
    Logout,
    Expired,
}

impl RevokedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevokedReason::Rotated => "rotated",
            RevokedReason::ReuseDetected => "reuse_detected",
            RevokedReason::Logout => "logout",
            RevokedReason::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rotated" => Some(RevokedReason::Rotated),
            "reuse_detected" => Some(RevokedReason::ReuseDetected),
            "logout" => Some(RevokedReason::Logout),
            "expired" => Some(RevokedReason::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for RevokedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<RevokedReason>,
}

impl Session {
    pub fn new(user_id: Uuid, user_agent: Option<String>, ip: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            user_agent,
            ip,
            created_at: Utc::now(),
            revoked: false,
            revoked_at: None,
            revoked_reason: None,
        }
    }
}

/// One node of a session's refresh chain
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub id: Uuid,
    pub secret_hash: String,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<RevokedReason>,
}

impl RefreshToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Parameters for a new chain node
#[derive(Debug, Clone, Copy)]
pub struct NewRefreshToken {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    LoginSuccess,
    TokenRefreshed,
    TokenReuseDetected,
    Logout,
    LogoutAll,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::LoginSuccess => "login_success",
            SecurityEventKind::TokenRefreshed => "token_refreshed",
            SecurityEventKind::TokenReuseDetected => "token_reuse_detected",
            SecurityEventKind::Logout => "logout",
            SecurityEventKind::LogoutAll => "logout_all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "login_success" => Some(SecurityEventKind::LoginSuccess),
            "token_refreshed" => Some(SecurityEventKind::TokenRefreshed),
            "token_reuse_detected" => Some(SecurityEventKind::TokenReuseDetected),
            "logout" => Some(SecurityEventKind::Logout),
            "logout_all" => Some(SecurityEventKind::LogoutAll),
            _ => None,
        }
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub kind: SecurityEventKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        kind: SecurityEventKind,
        user_id: Uuid,
        session_id: Option<Uuid>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_id,
            kind,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}
