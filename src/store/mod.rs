/// Storage layer
///
/// Three narrow async traits cover everything the session service persists:
/// users, sessions with their refresh chains, and the security event log.
/// `PgStore` is the production backend; `InMemoryStore` backs tests and
/// single-instance development runs. Both implement `try_revoke` and
/// `rotate` as atomic conditional transitions, so a chain never forks when
/// two refreshes race on the same token, and a failed rotation leaves the
/// presented token live.

mod memory;
mod models;
mod postgres;

pub use memory::InMemoryStore;
pub use models::{
    NewRefreshToken, RefreshToken, RevokedReason, SecurityEvent, SecurityEventKind, Session, User,
};
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{generate_refresh_secret, hash_refresh_secret};
use crate::error::AppError;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `DatabaseError::UniqueConstraintViolation` on a taken email
    async fn insert_user(&self, user: &User) -> Result<(), AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
    /// Increments and returns the user's token version
    async fn bump_token_version(&self, id: Uuid) -> Result<i32, AppError>;
}

#[async_trait]
pub trait RefreshStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<(), AppError>;
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, AppError>;

    /// Persist a fully built token record
    async fn insert_token(&self, token: &RefreshToken) -> Result<(), AppError>;
    async fn get(&self, id: Uuid) -> Result<Option<RefreshToken>, AppError>;

    /// Atomically flip `revoked: false -> true`.
    ///
    /// Returns true only for the call that performed the transition; false if
    /// the token was already revoked or does not exist.
    async fn try_revoke(&self, id: Uuid, reason: RevokedReason) -> Result<bool, AppError>;

    /// Revoke the session and every still-live token in its chain.
    ///
    /// Returns whether the session was live before this call.
    async fn revoke_session(&self, session_id: Uuid, reason: RevokedReason)
        -> Result<bool, AppError>;

    /// Revoke every live session of a user, returning how many were revoked
    async fn revoke_user_sessions(&self, user_id: Uuid, reason: RevokedReason)
        -> Result<u64, AppError>;

    /// Retire `old_id` as `Rotated` and insert `successor` as one atomic step.
    ///
    /// Returns false, persisting nothing, when `old_id` was already revoked.
    /// On error neither write is applied.
    async fn rotate(&self, old_id: Uuid, successor: &RefreshToken) -> Result<bool, AppError>;

    /// The session's chain ordered from first to most recent token
    async fn session_chain(&self, session_id: Uuid) -> Result<Vec<RefreshToken>, AppError>;

    /// Mint a new chain node, returning its id and the one-time raw secret
    async fn create(&self, new: NewRefreshToken) -> Result<(Uuid, String), AppError> {
        let (token, raw_secret) = mint_token(new);
        self.insert_token(&token).await?;

        tracing::debug!(
            token_id = %token.id,
            session_id = %token.session_id,
            parent_id = ?token.parent_id,
            "Refresh token created"
        );

        Ok((token.id, raw_secret))
    }
}

/// Build an unsaved live token record and its raw secret
pub fn mint_token(new: NewRefreshToken) -> (RefreshToken, String) {
    let raw_secret = generate_refresh_secret();
    let now = Utc::now();
    let token = RefreshToken {
        id: Uuid::new_v4(),
        secret_hash: hash_refresh_secret(&raw_secret),
        session_id: new.session_id,
        user_id: new.user_id,
        parent_id: new.parent_id,
        issued_at: now,
        expires_at: now + ChronoDuration::seconds(new.ttl_seconds),
        revoked: false,
        revoked_at: None,
        revoked_reason: None,
    };
    (token, raw_secret)
}

#[async_trait]
pub trait SecurityEventStore: Send + Sync {
    async fn append(&self, event: &SecurityEvent) -> Result<(), AppError>;
    /// Newest first
    async fn recent_for_user(&self, user_id: Uuid, limit: i64)
        -> Result<Vec<SecurityEvent>, AppError>;
}

/// Run a store operation under the caller's deadline.
///
/// A timeout is reported as `DatabaseError::Timeout`, never as success.
pub async fn bounded<T, F>(timeout: Duration, operation: &'static str, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|elapsed| {
            tracing::error!(
                operation = operation,
                timeout_ms = timeout.as_millis() as u64,
                "Store operation timed out"
            );
            AppError::from(elapsed)
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;

    #[tokio::test]
    async fn test_bounded_passes_through_result() {
        let value = bounded(Duration::from_millis(100), "noop", async { Ok::<_, AppError>(7) })
            .await
            .expect("should succeed");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_bounded_fails_closed_on_timeout() {
        let result = bounded(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, AppError>(true)
        })
        .await;

        assert!(matches!(
            result,
            Err(AppError::Database(DatabaseError::Timeout(_)))
        ));
    }
}
