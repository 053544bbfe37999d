/// In-memory store
///
/// A single mutex guards all tables, so every trait method is one critical
/// section and `try_revoke` is a true compare-and-set. Only safe for a single
/// process; multi-instance deployments use `PgStore`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::models::{RefreshToken, RevokedReason, SecurityEvent, Session, User};
use super::{RefreshStore, SecurityEventStore, UserStore};
use crate::error::{AppError, DatabaseError};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    emails: HashMap<String, Uuid>,
    sessions: HashMap<Uuid, Session>,
    tokens: HashMap<Uuid, RefreshToken>,
    events: Vec<SecurityEvent>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    latency: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation, to exercise caller deadlines
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            tables: Mutex::default(),
            latency: Some(latency),
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.tables
            .lock()
            .map_err(|_| AppError::Internal("in-memory store lock poisoned".to_string()))
    }
}

fn revoke_live_tokens(tables: &mut Tables, session_id: Uuid, reason: RevokedReason) {
    let now = Utc::now();
    for token in tables
        .tokens
        .values_mut()
        .filter(|t| t.session_id == session_id && !t.revoked)
    {
        token.revoked = true;
        token.revoked_at = Some(now);
        token.revoked_reason = Some(reason);
    }
}

fn revoke_session_locked(tables: &mut Tables, session_id: Uuid, reason: RevokedReason) -> bool {
    let was_live = match tables.sessions.get_mut(&session_id) {
        Some(session) if !session.revoked => {
            session.revoked = true;
            session.revoked_at = Some(Utc::now());
            session.revoked_reason = Some(reason);
            true
        }
        _ => false,
    };
    revoke_live_tokens(tables, session_id, reason);
    was_live
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        let mut tables = self.lock().await?;
        if tables.emails.contains_key(&user.email) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "Email already registered".to_string(),
            )
            .into());
        }
        tables.emails.insert(user.email.clone(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let tables = self.lock().await?;
        Ok(tables
            .emails
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.lock().await?.users.get(&id).cloned())
    }

    async fn bump_token_version(&self, id: Uuid) -> Result<i32, AppError> {
        let mut tables = self.lock().await?;
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::NotFound("user".to_string()))?;
        user.token_version += 1;
        Ok(user.token_version)
    }
}

#[async_trait]
impl RefreshStore for InMemoryStore {
    async fn create_session(&self, session: &Session) -> Result<(), AppError> {
        self.lock().await?.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        Ok(self.lock().await?.sessions.get(&id).cloned())
    }

    async fn insert_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        self.lock().await?.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RefreshToken>, AppError> {
        Ok(self.lock().await?.tokens.get(&id).cloned())
    }

    async fn try_revoke(&self, id: Uuid, reason: RevokedReason) -> Result<bool, AppError> {
        let mut tables = self.lock().await?;
        match tables.tokens.get_mut(&id) {
            Some(token) if !token.revoked => {
                token.revoked = true;
                token.revoked_at = Some(Utc::now());
                token.revoked_reason = Some(reason);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate(&self, old_id: Uuid, successor: &RefreshToken) -> Result<bool, AppError> {
        let mut tables = self.lock().await?;
        if tables.tokens.contains_key(&successor.id) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "refresh token id already exists".to_string(),
            )
            .into());
        }

        match tables.tokens.get_mut(&old_id) {
            Some(token) if !token.revoked => {
                token.revoked = true;
                token.revoked_at = Some(Utc::now());
                token.revoked_reason = Some(RevokedReason::Rotated);
            }
            _ => return Ok(false),
        }
        tables.tokens.insert(successor.id, successor.clone());
        Ok(true)
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: RevokedReason,
    ) -> Result<bool, AppError> {
        let mut tables = self.lock().await?;
        Ok(revoke_session_locked(&mut tables, session_id, reason))
    }

    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        reason: RevokedReason,
    ) -> Result<u64, AppError> {
        let mut tables = self.lock().await?;
        let session_ids: Vec<Uuid> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && !s.revoked)
            .map(|s| s.id)
            .collect();

        let mut revoked = 0;
        for session_id in session_ids {
            if revoke_session_locked(&mut tables, session_id, reason) {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn session_chain(&self, session_id: Uuid) -> Result<Vec<RefreshToken>, AppError> {
        let tables = self.lock().await?;
        let mut chain: Vec<RefreshToken> = tables
            .tokens
            .values()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        chain.sort_by_key(|t| t.issued_at);
        Ok(chain)
    }
}

#[async_trait]
impl SecurityEventStore for InMemoryStore {
    async fn append(&self, event: &SecurityEvent) -> Result<(), AppError> {
        self.lock().await?.events.push(event.clone());
        Ok(())
    }

    async fn recent_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SecurityEvent>, AppError> {
        let tables = self.lock().await?;
        Ok(tables
            .events
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
