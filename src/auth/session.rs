/// Session lifecycle: login, refresh-token rotation, reuse detection, logout.
///
/// Rotation of a presented `<id>.<secret>`:
/// 1. parse, 2. load token, 3. reject if the session is revoked,
/// 4. compare secret hashes, 5. a token retired by rotation is reuse and
///    revokes the session, even after it has expired,
/// 6. reject (and retire) expired tokens, 7. load the user and sign the
///    access credential, 8. `rotate`: retire the token and insert its
///    successor atomically. Exactly one caller wins step 8. A loser holds a
///    credential that was already retired, which is indistinguishable from a
///    replayed stolen token, so the whole session is revoked. Any failure
///    before step 8 commits leaves the presented token live, so a retry
///    after an infrastructure error is safe.
///
/// Every rejection surfaces as `InvalidToken`; the precise reason is only
/// logged and audited.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::audit::SecurityEventRecorder;
use crate::auth::claims::Claims;
use crate::auth::jwt::{AccessCredential, TokenIssuer};
use crate::auth::password::{hash_password, verify_against_dummy, verify_password};
use crate::auth::refresh_token::{secret_matches, CompositeToken};
use crate::error::{AppError, AuthError, TokenRejection};
use crate::store::{
    bounded, mint_token, NewRefreshToken, RefreshStore, RefreshToken, RevokedReason, SecurityEventKind,
    Session, User, UserStore,
};

/// Request metadata recorded on the session
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// Credentials produced by a successful login or rotation
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub access: AccessCredential,
    pub refresh: CompositeToken,
}

#[derive(Clone)]
pub struct SessionManager {
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn RefreshStore>,
    events: SecurityEventRecorder,
    issuer: TokenIssuer,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn RefreshStore>,
        events: SecurityEventRecorder,
        issuer: TokenIssuer,
        timeout: Duration,
    ) -> Self {
        Self {
            users,
            tokens,
            events,
            issuer,
            timeout,
        }
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn events(&self) -> &SecurityEventRecorder {
        &self.events
    }

    /// Create a user with a current-scheme password hash
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        roles: Vec<String>,
    ) -> Result<User, AppError> {
        let (password_hash, scheme) = hash_password(password)?;
        let user = User::new(email.to_lowercase(), password_hash, scheme, roles);
        bounded(self.timeout, "insert_user", self.users.insert_user(&user)).await?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Verify a password and open a new session with its first refresh token
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: ClientInfo,
    ) -> Result<SessionTokens, AppError> {
        let user = bounded(
            self.timeout,
            "find_user_by_email",
            self.users.find_by_email(&email.trim().to_lowercase()),
        )
        .await?;

        let user = match user {
            Some(user) if verify_password(password, &user.password_hash, user.hash_scheme) => user,
            Some(_) => return Err(AuthError::InvalidCredentials.into()),
            None => {
                verify_against_dummy(password);
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if user.hash_scheme.needs_rehash() {
            tracing::info!(
                user_id = %user.id,
                scheme = %user.hash_scheme,
                "Login verified against legacy hash scheme"
            );
        }

        let session = Session::new(user.id, client.user_agent.clone(), client.ip.clone());
        bounded(self.timeout, "create_session", self.tokens.create_session(&session)).await?;

        let refresh = self.mint_refresh(&session, None).await?;
        let access = self.issuer.issue(user.id, &user.roles, user.token_version)?;

        self.events
            .record(
                SecurityEventKind::LoginSuccess,
                user.id,
                Some(session.id),
                format!(
                    "ua={} ip={}",
                    client.user_agent.as_deref().unwrap_or(""),
                    client.ip.as_deref().unwrap_or("")
                ),
            )
            .await;

        tracing::info!(
            user_id = %user.id,
            session_id = %session.id,
            token_id = %refresh.id,
            "Session opened"
        );

        Ok(SessionTokens {
            user_id: user.id,
            session_id: session.id,
            access,
            refresh,
        })
    }

    /// Rotate a presented refresh credential
    pub async fn refresh(&self, presented: &str) -> Result<SessionTokens, AppError> {
        let credential = CompositeToken::parse(presented)?;

        let token = bounded(self.timeout, "get_refresh_token", self.tokens.get(credential.id))
            .await?
            .ok_or_else(|| AppError::invalid_token(TokenRejection::NotFound))?;

        let session = bounded(self.timeout, "get_session", self.tokens.get_session(token.session_id))
            .await?
            .ok_or_else(|| AppError::invalid_token(TokenRejection::NotFound))?;
        if session.revoked {
            tracing::info!(
                token_id = %token.id,
                session_id = %session.id,
                "Refresh attempted on revoked session"
            );
            return Err(AuthError::SessionRevoked.into());
        }

        if !secret_matches(credential.secret(), &token.secret_hash) {
            return Err(AppError::invalid_token(TokenRejection::HashMismatch));
        }

        // Any retired token coming back is reuse, however old it is
        if token.revoked {
            if token.revoked_reason == Some(RevokedReason::Expired) {
                return Err(AppError::invalid_token(TokenRejection::Expired));
            }
            self.escalate_reuse(&token).await?;
            return Err(AppError::invalid_token(TokenRejection::Reused));
        }

        if token.is_expired(chrono::Utc::now()) {
            bounded(
                self.timeout,
                "expire_refresh_token",
                self.tokens.try_revoke(token.id, RevokedReason::Expired),
            )
            .await?;
            return Err(AppError::invalid_token(TokenRejection::Expired));
        }

        let user = bounded(self.timeout, "find_user_by_id", self.users.find_by_id(token.user_id))
            .await?
            .ok_or_else(|| AppError::invalid_token(TokenRejection::UnknownSubject))?;
        let access = self.issuer.issue(user.id, &user.roles, user.token_version)?;

        let (successor, secret) = mint_token(NewRefreshToken {
            session_id: session.id,
            user_id: session.user_id,
            parent_id: Some(token.id),
            ttl_seconds: self.issuer.refresh_token_expiry(),
        });
        let rotated = bounded(
            self.timeout,
            "rotate_refresh_token",
            self.tokens.rotate(token.id, &successor),
        )
        .await?;
        if !rotated {
            self.escalate_reuse(&token).await?;
            return Err(AppError::invalid_token(TokenRejection::Reused));
        }
        let refresh = CompositeToken::new(successor.id, secret);

        self.events
            .record(
                SecurityEventKind::TokenRefreshed,
                user.id,
                Some(session.id),
                "refresh token rotated",
            )
            .await;

        tracing::info!(
            user_id = %user.id,
            session_id = %session.id,
            parent_id = %token.id,
            token_id = %refresh.id,
            "Refresh token rotated"
        );

        Ok(SessionTokens {
            user_id: user.id,
            session_id: session.id,
            access,
            refresh,
        })
    }

    /// A retired token came back: revoke its whole session
    async fn escalate_reuse(&self, token: &RefreshToken) -> Result<(), AppError> {
        tracing::warn!(
            token_id = %token.id,
            session_id = %token.session_id,
            user_id = %token.user_id,
            "Refresh token reuse detected, revoking session"
        );

        bounded(
            self.timeout,
            "revoke_session",
            self.tokens
                .revoke_session(token.session_id, RevokedReason::ReuseDetected),
        )
        .await?;

        self.events
            .record(
                SecurityEventKind::TokenReuseDetected,
                token.user_id,
                Some(token.session_id),
                format!("presented retired refresh token {}", token.id.simple()),
            )
            .await;
        Ok(())
    }

    /// Close the session owning the presented credential.
    ///
    /// Idempotent: absent, malformed, unknown or non-matching credentials and
    /// already-revoked sessions are all a successful no-op.
    pub async fn logout(&self, presented: Option<&str>) -> Result<(), AppError> {
        let credential = match presented.map(CompositeToken::parse) {
            Some(Ok(credential)) => credential,
            _ => return Ok(()),
        };

        let token = match bounded(self.timeout, "get_refresh_token", self.tokens.get(credential.id))
            .await?
        {
            Some(token) if secret_matches(credential.secret(), &token.secret_hash) => token,
            _ => return Ok(()),
        };

        let closed = bounded(
            self.timeout,
            "revoke_session",
            self.tokens.revoke_session(token.session_id, RevokedReason::Logout),
        )
        .await?;

        if closed {
            self.events
                .record(
                    SecurityEventKind::Logout,
                    token.user_id,
                    Some(token.session_id),
                    "session closed",
                )
                .await;
            tracing::info!(session_id = %token.session_id, "Session closed");
        }
        Ok(())
    }

    /// Invalidate every access credential and session of a user
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        let version = bounded(
            self.timeout,
            "bump_token_version",
            self.users.bump_token_version(user_id),
        )
        .await?;
        let revoked = bounded(
            self.timeout,
            "revoke_user_sessions",
            self.tokens.revoke_user_sessions(user_id, RevokedReason::Logout),
        )
        .await?;

        self.events
            .record(
                SecurityEventKind::LogoutAll,
                user_id,
                None,
                format!("token_version={} sessions={}", version, revoked),
            )
            .await;
        Ok(revoked)
    }

    /// Verify an access credential including the user's current token version
    pub async fn authenticate(&self, access_token: &str) -> Result<(Claims, User), AppError> {
        let claims = self.issuer.verify(access_token, None)?;
        let user = bounded(self.timeout, "find_user_by_id", self.users.find_by_id(claims.user_id()?))
            .await?
            .ok_or_else(|| AppError::invalid_token(TokenRejection::UnknownSubject))?;
        self.issuer.ensure_version(&claims, user.token_version)?;
        Ok((claims, user))
    }

    async fn mint_refresh(
        &self,
        session: &Session,
        parent_id: Option<Uuid>,
    ) -> Result<CompositeToken, AppError> {
        let (id, secret) = bounded(
            self.timeout,
            "create_refresh_token",
            self.tokens.create(NewRefreshToken {
                session_id: session.id,
                user_id: session.user_id,
                parent_id,
                ttl_seconds: self.issuer.refresh_token_expiry(),
            }),
        )
        .await?;
        Ok(CompositeToken::new(id, secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::JwtSettings;
    use crate::error::DatabaseError;
    use crate::store::{InMemoryStore, SecurityEventStore};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    const PASSWORD: &str = "CorrectHorse42";

    fn jwt_settings() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 3600,
            issuer: "invize-backend".to_string(),
            audience: "invize-client".to_string(),
        }
    }

    fn manager_with(store: Arc<InMemoryStore>, timeout: Duration) -> SessionManager {
        SessionManager::new(
            store.clone(),
            store.clone(),
            SecurityEventRecorder::new(store, timeout),
            TokenIssuer::new(jwt_settings()),
            timeout,
        )
    }

    async fn setup() -> (Arc<InMemoryStore>, SessionManager, User) {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager_with(store.clone(), Duration::from_secs(2));
        let user = manager
            .register("clerk@example.com", PASSWORD, vec!["clerk".to_string()])
            .await
            .unwrap();
        (store, manager, user)
    }

    fn assert_token_invalid(result: Result<SessionTokens, AppError>) {
        match result {
            Err(e) => assert!(e.is_token_rejection(), "unexpected error: {}", e),
            Ok(_) => panic!("refresh unexpectedly succeeded"),
        }
    }

    async fn live_tokens(store: &InMemoryStore, session_id: Uuid) -> usize {
        store
            .session_chain(session_id)
            .await
            .unwrap()
            .iter()
            .filter(|t| !t.revoked)
            .count()
    }

    async fn event_kinds(store: &InMemoryStore, user_id: Uuid) -> Vec<SecurityEventKind> {
        store
            .recent_for_user(user_id, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    /// Delegates to the in-memory store but can refuse the next rotation
    struct UnreliableRotation {
        inner: Arc<InMemoryStore>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl RefreshStore for UnreliableRotation {
        async fn create_session(&self, session: &Session) -> Result<(), AppError> {
            self.inner.create_session(session).await
        }

        async fn get_session(&self, id: Uuid) -> Result<Option<Session>, AppError> {
            self.inner.get_session(id).await
        }

        async fn insert_token(&self, token: &RefreshToken) -> Result<(), AppError> {
            self.inner.insert_token(token).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<RefreshToken>, AppError> {
            self.inner.get(id).await
        }

        async fn try_revoke(&self, id: Uuid, reason: RevokedReason) -> Result<bool, AppError> {
            self.inner.try_revoke(id, reason).await
        }

        async fn rotate(&self, old_id: Uuid, successor: &RefreshToken) -> Result<bool, AppError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(DatabaseError::ConnectionPool("connection reset".to_string()).into());
            }
            self.inner.rotate(old_id, successor).await
        }

        async fn revoke_session(
            &self,
            session_id: Uuid,
            reason: RevokedReason,
        ) -> Result<bool, AppError> {
            self.inner.revoke_session(session_id, reason).await
        }

        async fn revoke_user_sessions(
            &self,
            user_id: Uuid,
            reason: RevokedReason,
        ) -> Result<u64, AppError> {
            self.inner.revoke_user_sessions(user_id, reason).await
        }

        async fn session_chain(&self, session_id: Uuid) -> Result<Vec<RefreshToken>, AppError> {
            self.inner.session_chain(session_id).await
        }
    }

    #[tokio::test]
    async fn login_opens_session_with_one_live_token() {
        let (store, manager, user) = setup().await;

        let tokens = manager
            .login("Clerk@Example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();

        assert_eq!(tokens.user_id, user.id);
        let chain = store.session_chain(tokens.session_id).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].parent_id, None);
        assert!(!chain[0].revoked);

        let claims = manager.issuer().verify(&tokens.access.token, Some(0)).unwrap();
        assert_eq!(claims.roles, vec!["clerk".to_string()]);
        assert_eq!(event_kinds(&store, user.id).await, vec![SecurityEventKind::LoginSuccess]);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (_, manager, _) = setup().await;

        let wrong_password = manager
            .login("clerk@example.com", "WrongHorse42", ClientInfo::default())
            .await
            .unwrap_err();
        let unknown_user = manager
            .login("nobody@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AppError::Auth(AuthError::InvalidCredentials)));
        assert!(matches!(unknown_user, AppError::Auth(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn legacy_bcrypt_user_can_log_in() {
        let store = Arc::new(InMemoryStore::new());
        let manager = manager_with(store.clone(), Duration::from_secs(2));
        let legacy = User::new(
            "legacy@example.com".to_string(),
            bcrypt::hash(PASSWORD, 4).unwrap(),
            crate::auth::PasswordScheme::Bcrypt,
            vec![],
        );
        store.insert_user(&legacy).await.unwrap();

        let tokens = manager
            .login("legacy@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();
        assert_eq!(tokens.user_id, legacy.id);
    }

    #[tokio::test]
    async fn rotation_links_chain_and_keeps_single_live_token() {
        let (store, manager, user) = setup().await;
        let t0 = manager
            .login("clerk@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();

        let t1 = manager.refresh(&t0.refresh.encode()).await.unwrap();
        assert_ne!(t1.refresh.encode(), t0.refresh.encode());
        assert_eq!(t1.session_id, t0.session_id);
        assert_eq!(live_tokens(&store, t0.session_id).await, 1);

        let t2 = manager.refresh(&t1.refresh.encode()).await.unwrap();
        assert_eq!(live_tokens(&store, t0.session_id).await, 1);

        let chain = store.session_chain(t0.session_id).await.unwrap();
        let ids: Vec<Uuid> = chain.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![t0.refresh.id, t1.refresh.id, t2.refresh.id]);
        assert_eq!(chain[1].parent_id, Some(t0.refresh.id));
        assert_eq!(chain[2].parent_id, Some(t1.refresh.id));
        assert_eq!(chain[0].revoked_reason, Some(RevokedReason::Rotated));

        let kinds = event_kinds(&store, user.id).await;
        assert_eq!(
            kinds,
            vec![
                SecurityEventKind::TokenRefreshed,
                SecurityEventKind::TokenRefreshed,
                SecurityEventKind::LoginSuccess,
            ]
        );
    }

    #[tokio::test]
    async fn replaying_any_ancestor_kills_the_session() {
        let (store, manager, user) = setup().await;
        let t0 = manager
            .login("clerk@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();
        let t1 = manager.refresh(&t0.refresh.encode()).await.unwrap();
        let t2 = manager.refresh(&t1.refresh.encode()).await.unwrap();

        assert_token_invalid(manager.refresh(&t0.refresh.encode()).await);
        // The live descendant is now unusable too
        assert_token_invalid(manager.refresh(&t2.refresh.encode()).await);
        assert_token_invalid(manager.refresh(&t1.refresh.encode()).await);

        let session = store.get_session(t0.session_id).await.unwrap().unwrap();
        assert!(session.revoked);
        assert_eq!(session.revoked_reason, Some(RevokedReason::ReuseDetected));
        assert_eq!(live_tokens(&store, t0.session_id).await, 0);

        let kinds = event_kinds(&store, user.id).await;
        assert_eq!(
            kinds
                .iter()
                .filter(|k| **k == SecurityEventKind::TokenReuseDetected)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn replaying_rotated_token_after_expiry_still_kills_the_session() {
        let (store, manager, user) = setup().await;
        let t0 = manager
            .login("clerk@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();
        let t1 = manager.refresh(&t0.refresh.encode()).await.unwrap();

        // Age the rotated ancestor past its expiry
        let mut aged = store.get(t0.refresh.id).await.unwrap().unwrap();
        aged.expires_at = Utc::now() - ChronoDuration::days(1);
        store.insert_token(&aged).await.unwrap();

        let err = manager.refresh(&t0.refresh.encode()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Auth(AuthError::InvalidToken(TokenRejection::Reused))
        ));

        let session = store.get_session(t0.session_id).await.unwrap().unwrap();
        assert!(session.revoked);
        assert_eq!(session.revoked_reason, Some(RevokedReason::ReuseDetected));
        assert_token_invalid(manager.refresh(&t1.refresh.encode()).await);
        assert!(event_kinds(&store, user.id)
            .await
            .contains(&SecurityEventKind::TokenReuseDetected));
    }

    #[tokio::test]
    async fn failed_rotation_leaves_presented_token_usable() {
        let store = Arc::new(InMemoryStore::new());
        let tokens = Arc::new(UnreliableRotation {
            inner: store.clone(),
            fail_next: AtomicBool::new(false),
        });
        let timeout = Duration::from_secs(2);
        let manager = SessionManager::new(
            store.clone(),
            tokens.clone(),
            SecurityEventRecorder::new(store.clone(), timeout),
            TokenIssuer::new(jwt_settings()),
            timeout,
        );
        manager
            .register("clerk@example.com", PASSWORD, vec![])
            .await
            .unwrap();
        let t0 = manager
            .login("clerk@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();

        tokens.fail_next.store(true, Ordering::SeqCst);
        let err = manager.refresh(&t0.refresh.encode()).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert!(!store.get(t0.refresh.id).await.unwrap().unwrap().revoked);

        // The client's retry succeeds and the session survives
        let t1 = manager.refresh(&t0.refresh.encode()).await.unwrap();
        assert_eq!(t1.session_id, t0.session_id);
        assert!(!store.get_session(t0.session_id).await.unwrap().unwrap().revoked);
        assert_eq!(live_tokens(&store, t0.session_id).await, 1);
    }

    #[tokio::test]
    async fn concurrent_refresh_yields_one_success_and_revoked_session() {
        for _ in 0..20 {
            let (store, manager, _) = setup().await;
            let t0 = manager
                .login("clerk@example.com", PASSWORD, ClientInfo::default())
                .await
                .unwrap();
            let presented = t0.refresh.encode();

            let a = {
                let manager = manager.clone();
                let presented = presented.clone();
                tokio::spawn(async move { manager.refresh(&presented).await })
            };
            let b = {
                let manager = manager.clone();
                let presented = presented.clone();
                tokio::spawn(async move { manager.refresh(&presented).await })
            };
            let results = [a.await.unwrap(), b.await.unwrap()];

            let successes: Vec<&SessionTokens> =
                results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(successes.len(), 1);
            assert!(results.iter().any(|r| matches!(r, Err(e) if e.is_token_rejection())));

            let session = store.get_session(t0.session_id).await.unwrap().unwrap();
            assert!(session.revoked);
            // The winner's successor is dead as well
            assert_token_invalid(manager.refresh(&successes[0].refresh.encode()).await);
        }
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected_without_escalation() {
        let (store, manager, _) = setup().await;
        let t0 = manager
            .login("clerk@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();

        let forged = CompositeToken::new(
            t0.refresh.id,
            crate::auth::refresh_token::generate_refresh_secret(),
        );
        let err = manager.refresh(&forged.encode()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Auth(AuthError::InvalidToken(TokenRejection::HashMismatch))
        ));

        // Genuine credential still works
        assert!(manager.refresh(&t0.refresh.encode()).await.is_ok());
        assert!(!store.get_session(t0.session_id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn malformed_and_unknown_tokens_are_invalid() {
        let (_, manager, _) = setup().await;

        assert_token_invalid(manager.refresh("garbage").await);
        let unknown = CompositeToken::new(
            Uuid::new_v4(),
            crate::auth::refresh_token::generate_refresh_secret(),
        );
        assert_token_invalid(manager.refresh(&unknown.encode()).await);
    }

    #[tokio::test]
    async fn expired_token_is_retired_lazily() {
        let (store, manager, user) = setup().await;
        let session = Session::new(user.id, None, None);
        store.create_session(&session).await.unwrap();

        let secret = crate::auth::refresh_token::generate_refresh_secret();
        let issued_at = Utc::now() - ChronoDuration::hours(2);
        let expired = RefreshToken {
            id: Uuid::new_v4(),
            secret_hash: crate::auth::refresh_token::hash_refresh_secret(&secret),
            session_id: session.id,
            user_id: user.id,
            parent_id: None,
            issued_at,
            expires_at: issued_at + ChronoDuration::hours(1),
            revoked: false,
            revoked_at: None,
            revoked_reason: None,
        };
        store.insert_token(&expired).await.unwrap();
        let presented = CompositeToken::new(expired.id, secret).encode();

        let err = manager.refresh(&presented).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Auth(AuthError::InvalidToken(TokenRejection::Expired))
        ));
        let stored = store.get(expired.id).await.unwrap().unwrap();
        assert_eq!(stored.revoked_reason, Some(RevokedReason::Expired));

        // Presenting it again is still just "expired", not reuse
        assert_token_invalid(manager.refresh(&presented).await);
        assert!(!store.get_session(session.id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_blocks_refresh() {
        let (store, manager, user) = setup().await;
        let t0 = manager
            .login("clerk@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();
        let t1 = manager.refresh(&t0.refresh.encode()).await.unwrap();

        manager.logout(Some(&t1.refresh.encode())).await.unwrap();
        manager.logout(Some(&t1.refresh.encode())).await.unwrap();
        manager.logout(Some("garbage")).await.unwrap();
        manager.logout(None).await.unwrap();

        assert_token_invalid(manager.refresh(&t1.refresh.encode()).await);
        assert_token_invalid(manager.refresh(&t0.refresh.encode()).await);

        let session = store.get_session(t0.session_id).await.unwrap().unwrap();
        assert_eq!(session.revoked_reason, Some(RevokedReason::Logout));
        let kinds = event_kinds(&store, user.id).await;
        assert_eq!(kinds.iter().filter(|k| **k == SecurityEventKind::Logout).count(), 1);
        assert!(!kinds.contains(&SecurityEventKind::TokenReuseDetected));
    }

    #[tokio::test]
    async fn logout_requires_matching_secret() {
        let (store, manager, _) = setup().await;
        let t0 = manager
            .login("clerk@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();

        let forged = CompositeToken::new(
            t0.refresh.id,
            crate::auth::refresh_token::generate_refresh_secret(),
        );
        manager.logout(Some(&forged.encode())).await.unwrap();

        assert!(!store.get_session(t0.session_id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn logout_all_bumps_version_and_revokes_sessions() {
        let (store, manager, user) = setup().await;
        let first = manager
            .login("clerk@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();
        let second = manager
            .login("clerk@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap();

        assert!(manager.authenticate(&first.access.token).await.is_ok());
        assert_eq!(manager.logout_all(user.id).await.unwrap(), 2);

        let err = manager.authenticate(&first.access.token).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Auth(AuthError::InvalidToken(TokenRejection::VersionMismatch))
        ));
        assert_token_invalid(manager.refresh(&second.refresh.encode()).await);
        assert_eq!(store.find_by_id(user.id).await.unwrap().unwrap().token_version, 1);
    }

    #[tokio::test]
    async fn slow_store_fails_closed() {
        let store = Arc::new(InMemoryStore::with_latency(Duration::from_millis(100)));
        let manager = manager_with(store, Duration::from_millis(10));

        let err = manager
            .login("clerk@example.com", PASSWORD, ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Database(crate::error::DatabaseError::Timeout(_))
        ));
    }
}
