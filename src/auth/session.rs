/// Session Rotation Protocol
///
/// Login, signup, refresh, logout and "who am I" flows, composed from the
/// credential store, the access token issuer and the refresh session store.
///
/// Every flow writes its session row before handing tokens back, and a
/// presented refresh token is consumed by at most one successful refresh.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::claims::AccessPayload;
use crate::auth::credentials::{Authentication, CredentialStore, UserCreation};
use crate::auth::jwt::{TokenIssuer, TokenVerification};
use crate::auth::password::PasswordHasher;
use crate::auth::refresh_token::{
    generate_refresh_token, RefreshSessionStore, Rotation, SessionLookup, SessionWindow,
    TokenHasher,
};
use crate::configuration::AuthSettings;
use crate::error::{AppError, AuthError, DatabaseError};
use crate::store::{RefreshSession, SessionRepository, User, UserRepository};
use crate::validators::{is_valid_password, is_valid_username};

/// Token pair handed to the client after login, signup or refresh
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    /// Raw value; only ever sent back inside the refresh cookie
    pub refresh_token: String,
    pub user: AccessPayload,
}

/// Identity resolved for a "who am I" request
#[derive(Debug, Clone)]
pub enum ResolvedIdentity {
    /// The presented access token was valid; nothing was rotated
    Current {
        access_token: String,
        user: AccessPayload,
    },
    /// The access token was unusable and the refresh cookie was rotated
    Refreshed(IssuedSession),
}

impl ResolvedIdentity {
    pub fn user(&self) -> &AccessPayload {
        match self {
            ResolvedIdentity::Current { user, .. } => user,
            ResolvedIdentity::Refreshed(issued) => &issued.user,
        }
    }
}

#[derive(Clone)]
pub struct SessionProtocol {
    credentials: CredentialStore,
    tokens: TokenIssuer,
    sessions: RefreshSessionStore,
}

impl SessionProtocol {
    pub fn new(
        credentials: CredentialStore,
        tokens: TokenIssuer,
        sessions: RefreshSessionStore,
    ) -> Self {
        Self {
            credentials,
            tokens,
            sessions,
        }
    }

    /// Build every component from configuration over the given repositories
    ///
    /// # Errors
    /// Returns error if the refresh hash secret is unusable or hashing fails
    pub async fn from_settings(
        settings: &AuthSettings,
        store_timeout: Duration,
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
    ) -> Result<Self, AppError> {
        settings
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        let hasher = PasswordHasher::new(settings.bcrypt_cost, settings.max_concurrent_hashes);
        let credentials = CredentialStore::new(users, hasher, store_timeout).await?;
        let sessions = RefreshSessionStore::new(
            sessions,
            TokenHasher::new(&settings.refresh_hash_secret)?,
            SessionWindow::days(settings.refresh_token_expiry_days),
            store_timeout,
        );

        Ok(Self::new(credentials, TokenIssuer::new(settings), sessions))
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Authenticate and open a new session
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown user or a wrong password; server
    /// errors for storage failures
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedSession, AppError> {
        let user = self.check_credentials(username, password).await?;
        let issued = self.issue(user.id, &user.username).await?;
        tracing::info!(user_id = %user.id, "User logged in successfully");

        Ok(issued)
    }

    /// Check a sensor device's credentials without opening a session
    ///
    /// # Errors
    /// Same as [`SessionProtocol::login`]
    pub async fn verify_device(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AccessPayload, AppError> {
        let user = self.check_credentials(username, password).await?;
        tracing::info!(user_id = %user.id, "Device credentials verified");

        Ok(AccessPayload {
            id: user.id,
            username: user.username,
        })
    }

    /// Create a user and open their first session
    ///
    /// # Errors
    /// Validation errors for malformed input, `UserExists` for a taken
    /// username, server errors for storage failures
    pub async fn signup(&self, username: &str, password: &str) -> Result<IssuedSession, AppError> {
        let username = is_valid_username(username)?;
        is_valid_password(password)?;

        match self.credentials.create_user(&username, password).await? {
            UserCreation::Conflict => Err(AuthError::UserExists.into()),
            UserCreation::Created(user) => {
                let issued = self.issue(user.id, &user.username).await?;
                tracing::info!(user_id = %user.id, "User registered successfully");
                Ok(issued)
            }
        }
    }

    /// Exchange a refresh token for a new token pair, consuming it
    ///
    /// # Errors
    /// `InvalidRefreshToken` for unknown, expired or already consumed tokens;
    /// server errors for storage failures
    pub async fn refresh(&self, raw_refresh_token: &str) -> Result<IssuedSession, AppError> {
        let session = match self.sessions.lookup(raw_refresh_token).await? {
            SessionLookup::NotFound | SessionLookup::Expired => {
                return Err(AuthError::InvalidRefreshToken.into());
            }
            SessionLookup::Found(session) => session,
        };

        let new_refresh_token = generate_refresh_token();
        let rotated = match self.rotate_with_retry(&session, &new_refresh_token).await? {
            Rotation::Conflict => return Err(AuthError::InvalidRefreshToken.into()),
            Rotation::Rotated(rotated) => rotated,
        };

        let user = AccessPayload {
            id: rotated.user_id,
            username: rotated.username,
        };
        let access_token = self.sign_or_discard(&user, rotated.id).await?;

        tracing::info!(user_id = %user.id, session_id = %rotated.id, "Token refreshed successfully");

        Ok(IssuedSession {
            access_token,
            refresh_token: new_refresh_token,
            user,
        })
    }

    /// Resolve the caller's identity
    ///
    /// A valid access token answers without touching the store; otherwise
    /// the refresh token, when present, is rotated.
    ///
    /// # Errors
    /// `InvalidAccessToken` when neither credential is usable; server errors
    /// for storage failures
    pub async fn resolve_identity(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<ResolvedIdentity, AppError> {
        if let Some(token) = access_token {
            match self.tokens.verify(token) {
                TokenVerification::Valid(user) => {
                    return Ok(ResolvedIdentity::Current {
                        access_token: token.to_string(),
                        user,
                    });
                }
                TokenVerification::Expired | TokenVerification::Invalid => {
                    tracing::debug!("Access token unusable, falling back to refresh token");
                }
            }
        }

        let Some(raw) = refresh_token else {
            return Err(AuthError::InvalidAccessToken.into());
        };

        match self.refresh(raw).await {
            Ok(issued) => Ok(ResolvedIdentity::Refreshed(issued)),
            Err(AppError::Auth(AuthError::InvalidRefreshToken)) => {
                Err(AuthError::InvalidAccessToken.into())
            }
            Err(e) => Err(e),
        }
    }

    /// End the session holding `raw_refresh_token`
    ///
    /// Unknown or already revoked tokens are not an error. Other sessions of
    /// the same user are untouched.
    ///
    /// # Errors
    /// Server errors for storage failures
    pub async fn logout(&self, raw_refresh_token: Option<&str>) -> Result<(), AppError> {
        if let Some(raw) = raw_refresh_token {
            self.sessions.delete_by_token(raw).await?;
        }

        Ok(())
    }

    async fn check_credentials(&self, username: &str, password: &str) -> Result<User, AppError> {
        match self
            .credentials
            .authenticate(username.trim(), password)
            .await?
        {
            Authentication::UserNotFound | Authentication::InvalidPassword => {
                Err(AuthError::InvalidCredentials.into())
            }
            Authentication::Authenticated(user) => Ok(user),
        }
    }

    /// Write the session row, then sign the access token
    async fn issue(&self, user_id: Uuid, username: &str) -> Result<IssuedSession, AppError> {
        let refresh_token = generate_refresh_token();
        let session_id = self
            .sessions
            .create(user_id, username, &refresh_token)
            .await?;

        let user = AccessPayload {
            id: user_id,
            username: username.to_string(),
        };
        let access_token = self.sign_or_discard(&user, session_id).await?;

        Ok(IssuedSession {
            access_token,
            refresh_token,
            user,
        })
    }

    /// Sign an access token; on failure drop the session nobody will hold a token for
    async fn sign_or_discard(
        &self,
        user: &AccessPayload,
        session_id: Uuid,
    ) -> Result<String, AppError> {
        match self.tokens.sign(user) {
            Ok(token) => Ok(token),
            Err(e) => {
                if let Err(cleanup) = self.sessions.delete_by_session_id(session_id).await {
                    tracing::error!(
                        session_id = %session_id,
                        error = %cleanup,
                        "Failed to discard session after signing failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Conditional rotation, retried once on a transient store error
    async fn rotate_with_retry(
        &self,
        session: &RefreshSession,
        new_refresh_token: &str,
    ) -> Result<Rotation, DatabaseError> {
        match self
            .sessions
            .rotate(session.id, &session.token_hash, new_refresh_token)
            .await
        {
            Err(e) if e.is_transient() => {
                tracing::warn!(session_id = %session.id, error = %e, "Retrying refresh rotation");
                let retried = self
                    .sessions
                    .rotate(session.id, &session.token_hash, new_refresh_token)
                    .await?;

                if retried == Rotation::Conflict {
                    // The failed attempt may have committed our hash; nobody holds that token
                    if let Err(cleanup) = self.sessions.delete_by_token(new_refresh_token).await {
                        tracing::error!(
                            session_id = %session.id,
                            error = %cleanup,
                            "Failed to discard session after ambiguous rotation"
                        );
                    }
                }

                Ok(retried)
            }
            outcome => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewSession, NewUser};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_settings() -> AuthSettings {
        AuthSettings {
            jwt_secret: "test-secret-key-at-least-32-characters-long".to_string(),
            issuer: "test".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry_days: 7,
            refresh_hash_secret: "test-refresh-secret".to_string(),
            bcrypt_cost: 4,
            max_concurrent_hashes: 4,
        }
    }

    async fn protocol_over<S>(store: Arc<S>) -> SessionProtocol
    where
        S: UserRepository + SessionRepository + 'static,
    {
        SessionProtocol::from_settings(
            &test_settings(),
            Duration::from_millis(200),
            store.clone(),
            store,
        )
        .await
        .unwrap()
    }

    async fn protocol() -> (Arc<MemoryStore>, SessionProtocol) {
        let store = Arc::new(MemoryStore::new());
        let protocol = protocol_over(store.clone()).await;
        (store, protocol)
    }

    fn auth_error(result: Result<impl std::fmt::Debug, AppError>) -> AuthError {
        match result {
            Err(AppError::Auth(e)) => e,
            other => panic!("Expected an auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn signup_then_login_issues_distinct_sessions() {
        let (store, protocol) = protocol().await;

        let signup = protocol.signup("alice", "pw1").await.unwrap();
        let login = protocol.login("alice", "pw1").await.unwrap();

        assert_eq!(signup.user, login.user);
        assert_ne!(signup.refresh_token, login.refresh_token);
        assert_eq!(store.session_count(), 2);
        assert_eq!(
            protocol.tokens().verify(&login.access_token),
            TokenVerification::Valid(login.user.clone())
        );
    }

    #[tokio::test]
    async fn login_merges_unknown_user_and_wrong_password() {
        let (_, protocol) = protocol().await;
        protocol.signup("alice", "pw1").await.unwrap();

        assert_eq!(
            auth_error(protocol.login("alice", "wrong").await),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            auth_error(protocol.login("bob", "pw1").await),
            AuthError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn signup_with_taken_username_fails() {
        let (_, protocol) = protocol().await;
        protocol.signup("alice", "pw1").await.unwrap();

        assert_eq!(
            auth_error(protocol.signup("alice", "another").await),
            AuthError::UserExists
        );
    }

    #[tokio::test]
    async fn signup_rejects_malformed_input() {
        let (store, protocol) = protocol().await;

        assert!(matches!(
            protocol.signup("   ", "pw1").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            protocol.signup("alice", "").await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn refresh_token_is_accepted_exactly_once() {
        let (store, protocol) = protocol().await;
        let login = protocol.signup("alice", "pw1").await.unwrap();

        let refreshed = protocol.refresh(&login.refresh_token).await.unwrap();
        assert_ne!(refreshed.refresh_token, login.refresh_token);
        assert_eq!(refreshed.user, login.user);

        assert_eq!(
            auth_error(protocol.refresh(&login.refresh_token).await),
            AuthError::InvalidRefreshToken
        );
        // Rotation updates the row in place
        assert_eq!(store.session_count(), 1);

        protocol.refresh(&refreshed.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn signup_login_refresh_scenario() {
        let (_, protocol) = protocol().await;

        let signup = protocol.signup("alice", "pw1").await.unwrap();
        let login = protocol.login("alice", "pw1").await.unwrap();
        assert_ne!(signup.refresh_token, login.refresh_token);

        let refreshed = protocol.refresh(&login.refresh_token).await.unwrap();
        assert_eq!(
            auth_error(protocol.refresh(&login.refresh_token).await),
            AuthError::InvalidRefreshToken
        );
        assert_ne!(refreshed.refresh_token, login.refresh_token);
    }

    #[tokio::test]
    async fn concurrent_refreshes_of_one_token_have_one_winner() {
        let (_, protocol) = protocol().await;
        let login = protocol.signup("alice", "pw1").await.unwrap();

        let (first, second) = tokio::join!(
            protocol.refresh(&login.refresh_token),
            protocol.refresh(&login.refresh_token)
        );

        let winners = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let loser = if first.is_ok() { second } else { first };
        assert_eq!(auth_error(loser), AuthError::InvalidRefreshToken);
    }

    async fn seed_session(
        store: &MemoryStore,
        protocol: &SessionProtocol,
        raw: &str,
        created_at: DateTime<Utc>,
    ) {
        let user = store
            .insert_user(NewUser {
                username: "carol".to_string(),
                password_hash: "unused".to_string(),
            })
            .await
            .unwrap();
        store
            .insert_session(NewSession {
                user_id: user.id,
                username: user.username,
                token_hash: protocol.sessions.hash_token(raw),
                created_at,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let (store, protocol) = protocol().await;
        seed_session(&store, &protocol, "stale", Utc::now() - chrono::Duration::days(8)).await;

        assert_eq!(
            auth_error(protocol.refresh("stale").await),
            AuthError::InvalidRefreshToken
        );
        assert_eq!(
            auth_error(protocol.resolve_identity(None, Some("stale")).await),
            AuthError::InvalidAccessToken
        );
    }

    #[tokio::test]
    async fn future_dated_session_is_rejected() {
        let (store, protocol) = protocol().await;
        seed_session(&store, &protocol, "forged", Utc::now() + chrono::Duration::days(1)).await;

        assert_eq!(
            auth_error(protocol.refresh("forged").await),
            AuthError::InvalidRefreshToken
        );
    }

    #[tokio::test]
    async fn session_at_window_boundary_is_still_valid() {
        let (store, protocol) = protocol().await;
        // A few seconds inside the boundary so the check runs before it passes
        let created_at = Utc::now() - chrono::Duration::days(7) + chrono::Duration::seconds(5);
        seed_session(&store, &protocol, "edge", created_at).await;

        assert!(protocol.refresh("edge").await.is_ok());
    }

    #[tokio::test]
    async fn resolve_identity_uses_valid_access_token_without_rotation() {
        let (store, protocol) = protocol().await;
        let login = protocol.signup("alice", "pw1").await.unwrap();

        let resolved = protocol
            .resolve_identity(Some(&login.access_token), Some(&login.refresh_token))
            .await
            .unwrap();

        assert!(matches!(resolved, ResolvedIdentity::Current { .. }));
        assert_eq!(resolved.user(), &login.user);
        // The refresh token was not consumed
        assert!(protocol.refresh(&login.refresh_token).await.is_ok());
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn resolve_identity_falls_back_to_refresh_token() {
        let (_, protocol) = protocol().await;
        let login = protocol.signup("alice", "pw1").await.unwrap();

        let resolved = protocol
            .resolve_identity(Some("not-a-jwt"), Some(&login.refresh_token))
            .await
            .unwrap();

        let ResolvedIdentity::Refreshed(issued) = resolved else {
            panic!("Expected the refresh token to be rotated");
        };
        assert_eq!(issued.user, login.user);
        assert_eq!(
            auth_error(protocol.refresh(&login.refresh_token).await),
            AuthError::InvalidRefreshToken
        );
    }

    #[tokio::test]
    async fn resolve_identity_without_credentials_fails() {
        let (_, protocol) = protocol().await;

        assert_eq!(
            auth_error(protocol.resolve_identity(None, None).await),
            AuthError::InvalidAccessToken
        );
        assert_eq!(
            auth_error(protocol.resolve_identity(Some("bad"), Some("unknown")).await),
            AuthError::InvalidAccessToken
        );
    }

    #[tokio::test]
    async fn device_check_opens_no_session() {
        let (store, protocol) = protocol().await;
        let signup = protocol.signup("pi-kitchen", "pw1").await.unwrap();

        let device = protocol.verify_device("pi-kitchen", "pw1").await.unwrap();

        assert_eq!(device, signup.user);
        assert_eq!(store.session_count(), 1);
        assert_eq!(
            auth_error(protocol.verify_device("pi-kitchen", "pw2").await),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            auth_error(protocol.verify_device("pi-bedroom", "pw1").await),
            AuthError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn out_of_range_settings_are_rejected() {
        let mut settings = test_settings();
        settings.refresh_token_expiry_days = i64::MAX;
        let store = Arc::new(MemoryStore::new());

        let result =
            SessionProtocol::from_settings(&settings, Duration::from_secs(1), store.clone(), store)
                .await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_scoped_to_one_session() {
        let (store, protocol) = protocol().await;
        let laptop = protocol.signup("alice", "pw1").await.unwrap();
        let phone = protocol.login("alice", "pw1").await.unwrap();

        protocol.logout(Some(&laptop.refresh_token)).await.unwrap();
        protocol.logout(Some(&laptop.refresh_token)).await.unwrap();
        protocol.logout(None).await.unwrap();

        assert_eq!(store.session_count(), 1);
        assert_eq!(
            auth_error(protocol.refresh(&laptop.refresh_token).await),
            AuthError::InvalidRefreshToken
        );
        assert!(protocol.refresh(&phone.refresh_token).await.is_ok());
    }

    /// Session repository whose first `replace_hash` calls fail transiently
    struct FlakySessions {
        inner: MemoryStore,
        failures_left: AtomicUsize,
        /// Apply the write before reporting the failure, like a timed out commit
        commit_failed_writes: bool,
    }

    #[async_trait]
    impl UserRepository for FlakySessions {
        async fn find_by_username(
            &self,
            username: &str,
        ) -> Result<Option<crate::store::User>, DatabaseError> {
            self.inner.find_by_username(username).await
        }

        async fn insert_user(&self, user: NewUser) -> Result<crate::store::User, DatabaseError> {
            self.inner.insert_user(user).await
        }
    }

    #[async_trait]
    impl SessionRepository for FlakySessions {
        async fn insert_session(
            &self,
            session: NewSession,
        ) -> Result<RefreshSession, DatabaseError> {
            self.inner.insert_session(session).await
        }

        async fn find_by_hash(
            &self,
            token_hash: &str,
        ) -> Result<Option<RefreshSession>, DatabaseError> {
            self.inner.find_by_hash(token_hash).await
        }

        async fn replace_hash(
            &self,
            id: Uuid,
            expected_hash: &str,
            new_hash: &str,
            rotated_at: DateTime<Utc>,
        ) -> Result<Option<RefreshSession>, DatabaseError> {
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                if self.commit_failed_writes {
                    self.inner
                        .replace_hash(id, expected_hash, new_hash, rotated_at)
                        .await?;
                    return Err(DatabaseError::Timeout);
                }
                return Err(DatabaseError::ConnectionPool("connection reset".to_string()));
            }
            self.inner
                .replace_hash(id, expected_hash, new_hash, rotated_at)
                .await
        }

        async fn delete_by_hash(&self, token_hash: &str) -> Result<u64, DatabaseError> {
            self.inner.delete_by_hash(token_hash).await
        }

        async fn delete_by_id(&self, id: Uuid) -> Result<u64, DatabaseError> {
            self.inner.delete_by_id(id).await
        }
    }

    fn flaky(failures: usize) -> Arc<FlakySessions> {
        Arc::new(FlakySessions {
            inner: MemoryStore::new(),
            failures_left: AtomicUsize::new(failures),
            commit_failed_writes: false,
        })
    }

    #[tokio::test]
    async fn committed_rotation_reported_as_failure_leaves_no_session() {
        let store = Arc::new(FlakySessions {
            inner: MemoryStore::new(),
            failures_left: AtomicUsize::new(1),
            commit_failed_writes: true,
        });
        let protocol = protocol_over(store.clone()).await;
        let login = protocol.signup("alice", "pw1").await.unwrap();
        assert_eq!(store.inner.session_count(), 1);

        assert_eq!(
            auth_error(protocol.refresh(&login.refresh_token).await),
            AuthError::InvalidRefreshToken
        );
        assert_eq!(store.inner.session_count(), 0);
    }

    #[tokio::test]
    async fn rotation_retries_one_transient_failure() {
        let protocol = protocol_over(flaky(1)).await;
        let login = protocol.signup("alice", "pw1").await.unwrap();

        assert!(protocol.refresh(&login.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn rotation_gives_up_after_second_failure() {
        let protocol = protocol_over(flaky(2)).await;
        let login = protocol.signup("alice", "pw1").await.unwrap();

        let result = protocol.refresh(&login.refresh_token).await;
        assert!(matches!(result, Err(ref e) if e.is_server_error()));
    }

    /// User repository that never answers
    struct StalledUsers;

    #[async_trait]
    impl UserRepository for StalledUsers {
        async fn find_by_username(
            &self,
            _username: &str,
        ) -> Result<Option<crate::store::User>, DatabaseError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn insert_user(&self, _user: NewUser) -> Result<crate::store::User, DatabaseError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(DatabaseError::Timeout)
        }
    }

    #[tokio::test]
    async fn stalled_store_fails_with_server_error() {
        let protocol = SessionProtocol::from_settings(
            &test_settings(),
            Duration::from_millis(50),
            Arc::new(StalledUsers),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

        let result = protocol.login("alice", "pw1").await;
        assert!(matches!(
            result,
            Err(AppError::Database(DatabaseError::Timeout))
        ));
    }
}
