/// PostgreSQL store
///
/// Every revocation path is a conditional `UPDATE ... WHERE revoked = false`,
/// and rotation retires the parent and inserts the successor in one
/// transaction, so the single-live-token guarantee holds across any number
/// of service instances sharing the database.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use super::models::{RefreshToken, RevokedReason, SecurityEvent, SecurityEventKind, Session, User};
use super::{RefreshStore, SecurityEventStore, UserStore};
use crate::auth::PasswordScheme;
use crate::error::{AppError, DatabaseError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::UnexpectedError(e.to_string())))
    }
}

fn parse_reason(value: Option<String>) -> Option<RevokedReason> {
    value.as_deref().and_then(RevokedReason::parse)
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let scheme: String = row.try_get("hash_scheme")?;
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        hash_scheme: PasswordScheme::parse(&scheme).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown hash scheme: {}", scheme).into())
        })?,
        roles: row.try_get("roles")?,
        token_version: row.try_get("token_version")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, sqlx::Error> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        user_agent: row.try_get("user_agent")?,
        ip: row.try_get("ip")?,
        created_at: row.try_get("created_at")?,
        revoked: row.try_get("revoked")?,
        revoked_at: row.try_get("revoked_at")?,
        revoked_reason: parse_reason(row.try_get("revoked_reason")?),
    })
}

fn token_from_row(row: &PgRow) -> Result<RefreshToken, sqlx::Error> {
    Ok(RefreshToken {
        id: row.try_get("id")?,
        secret_hash: row.try_get("secret_hash")?,
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        parent_id: row.try_get("parent_id")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked: row.try_get("revoked")?,
        revoked_at: row.try_get("revoked_at")?,
        revoked_reason: parse_reason(row.try_get("revoked_reason")?),
    })
}

fn event_from_row(row: &PgRow) -> Result<SecurityEvent, sqlx::Error> {
    let kind: String = row.try_get("kind")?;
    Ok(SecurityEvent {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        session_id: row.try_get("session_id")?,
        kind: SecurityEventKind::parse(&kind).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown event kind: {}", kind).into())
        })?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn insert_token_query(token: &RefreshToken) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens
            (id, secret_hash, session_id, user_id, parent_id, issued_at, expires_at, revoked)
        VALUES ($1, $2, $3, $4, $5, $6, $7, false)
        "#,
    )
    .bind(token.id)
    .bind(&token.secret_hash)
    .bind(token.session_id)
    .bind(token.user_id)
    .bind(token.parent_id)
    .bind(token.issued_at)
    .bind(token.expires_at)
}

const TOKEN_COLUMNS: &str = "id, secret_hash, session_id, user_id, parent_id, issued_at, \
     expires_at, revoked, revoked_at, revoked_reason";

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, hash_scheme, roles, token_version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.hash_scheme.as_str())
        .bind(&user.roles)
        .bind(user.token_version)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, hash_scheme, roles, token_version, created_at \
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, hash_scheme, roles, token_version, created_at \
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn bump_token_version(&self, id: Uuid) -> Result<i32, AppError> {
        let version = sqlx::query_scalar::<_, i32>(
            "UPDATE users SET token_version = token_version + 1 WHERE id = $1 RETURNING token_version",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound("user".to_string()))?;
        Ok(version)
    }
}

#[async_trait]
impl RefreshStore for PgStore {
    async fn create_session(&self, session: &Session) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, user_agent, ip, created_at, revoked)
            VALUES ($1, $2, $3, $4, $5, false)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.user_agent)
        .bind(&session.ip)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, AppError> {
        let row = sqlx::query(
            "SELECT id, user_id, user_agent, ip, created_at, revoked, revoked_at, revoked_reason \
             FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    async fn insert_token(&self, token: &RefreshToken) -> Result<(), AppError> {
        insert_token_query(token).execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RefreshToken>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM refresh_tokens WHERE id = $1",
            TOKEN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(token_from_row).transpose()?)
    }

    async fn try_revoke(&self, id: Uuid, reason: RevokedReason) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = $1, revoked_reason = $2
            WHERE id = $3 AND revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(reason.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn rotate(&self, old_id: Uuid, successor: &RefreshToken) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let retired = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = $1, revoked_reason = $2
            WHERE id = $3 AND revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(RevokedReason::Rotated.as_str())
        .bind(old_id)
        .execute(&mut tx)
        .await?;

        if retired.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_token_query(successor).execute(&mut tx).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: RevokedReason,
    ) -> Result<bool, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked = true, revoked_at = $1, revoked_reason = $2
            WHERE id = $3 AND revoked = false
            "#,
        )
        .bind(now)
        .bind(reason.as_str())
        .bind(session_id)
        .execute(&mut tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = $1, revoked_reason = $2
            WHERE session_id = $3 AND revoked = false
            "#,
        )
        .bind(now)
        .bind(reason.as_str())
        .bind(session_id)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(session.rows_affected() == 1)
    }

    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        reason: RevokedReason,
    ) -> Result<u64, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let sessions = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked = true, revoked_at = $1, revoked_reason = $2
            WHERE user_id = $3 AND revoked = false
            "#,
        )
        .bind(now)
        .bind(reason.as_str())
        .bind(user_id)
        .execute(&mut tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true, revoked_at = $1, revoked_reason = $2
            WHERE user_id = $3 AND revoked = false
            "#,
        )
        .bind(now)
        .bind(reason.as_str())
        .bind(user_id)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(sessions.rows_affected())
    }

    async fn session_chain(&self, session_id: Uuid) -> Result<Vec<RefreshToken>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM refresh_tokens WHERE session_id = $1 ORDER BY issued_at ASC",
            TOKEN_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(token_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl SecurityEventStore for PgStore {
    async fn append(&self, event: &SecurityEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO security_events (id, user_id, session_id, kind, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.session_id)
        .bind(event.kind.as_str())
        .bind(&event.message)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SecurityEvent>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, session_id, kind, message, created_at
            FROM security_events
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(event_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}
