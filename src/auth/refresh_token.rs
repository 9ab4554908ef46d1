/// Refresh Token Management
///
/// Refresh tokens are:
/// - Cryptographically secure random 64-character alphanumeric strings
/// - Stored only as an HMAC-SHA256 of the raw value under a server secret
/// - Bound to exactly one session row, rotated on every use
/// - Valid for a whole number of days from the session's last rotation

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};
use crate::store::{with_timeout, NewSession, RefreshSession, SessionRepository};

type HmacSha256 = Hmac<Sha256>;

const REFRESH_TOKEN_LENGTH: usize = 64;

/// Generate a new cryptographically secure refresh token
///
/// The token is returned in plaintext (this is what the client stores).
pub fn generate_refresh_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Keyed one-way hash for refresh tokens
#[derive(Clone)]
pub struct TokenHasher {
    keyed: HmacSha256,
}

impl TokenHasher {
    /// # Errors
    /// Returns error if the secret is empty
    pub fn new(secret: &str) -> Result<Self, AppError> {
        if secret.is_empty() {
            return Err(AppError::Config("refresh hash secret is empty".to_string()));
        }

        let keyed = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Config(format!("refresh hash secret rejected: {}", e)))?;

        Ok(Self { keyed })
    }

    /// Hex-encoded HMAC-SHA256 of `token`
    pub fn hash(&self, token: &str) -> String {
        let mut mac = self.keyed.clone();
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Validity window of a refresh session, in whole days
#[derive(Debug, Clone, Copy)]
pub struct SessionWindow {
    days: i64,
}

impl SessionWindow {
    pub fn days(days: i64) -> Self {
        Self { days }
    }

    /// A session is live when it was (re)issued no later than `now` and no
    /// earlier than `now - days`; the boundary itself is still live.
    pub fn contains(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if created_at > now {
            return false;
        }

        created_at >= now - Duration::days(self.days)
    }
}

/// Result of looking a raw refresh token up
#[derive(Debug, Clone, PartialEq)]
pub enum SessionLookup {
    NotFound,
    Expired,
    Found(RefreshSession),
}

/// Result of a conditional rotation
#[derive(Debug, Clone, PartialEq)]
pub enum Rotation {
    Rotated(RefreshSession),
    /// Another rotation already replaced the expected hash
    Conflict,
}

/// Server-side bookkeeping for refresh sessions
#[derive(Clone)]
pub struct RefreshSessionStore {
    sessions: Arc<dyn SessionRepository>,
    hasher: TokenHasher,
    window: SessionWindow,
    timeout: std::time::Duration,
}

impl RefreshSessionStore {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        hasher: TokenHasher,
        window: SessionWindow,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            sessions,
            hasher,
            window,
            timeout,
        }
    }

    pub fn hash_token(&self, raw_token: &str) -> String {
        self.hasher.hash(raw_token)
    }

    /// Persist a new session for `raw_token`
    ///
    /// # Errors
    /// Returns error if the database operation fails or times out
    pub async fn create(
        &self,
        user_id: Uuid,
        username: &str,
        raw_token: &str,
    ) -> Result<Uuid, DatabaseError> {
        let session = NewSession {
            user_id,
            username: username.to_string(),
            token_hash: self.hash_token(raw_token),
            created_at: Utc::now(),
        };

        let created = with_timeout(self.timeout, self.sessions.insert_session(session)).await?;
        tracing::info!(user_id = %user_id, session_id = %created.id, "Refresh session created");

        Ok(created.id)
    }

    /// Find the live session for `raw_token`
    ///
    /// # Errors
    /// Returns error if the database operation fails or times out
    pub async fn lookup(&self, raw_token: &str) -> Result<SessionLookup, DatabaseError> {
        let token_hash = self.hash_token(raw_token);
        let found = with_timeout(self.timeout, self.sessions.find_by_hash(&token_hash)).await?;

        match found {
            None => {
                tracing::warn!("Refresh token not found");
                Ok(SessionLookup::NotFound)
            }
            Some(session) if !self.window.contains(session.created_at, Utc::now()) => {
                tracing::info!(
                    session_id = %session.id,
                    user_id = %session.user_id,
                    created_at = %session.created_at,
                    "Refresh session outside its validity window"
                );
                Ok(SessionLookup::Expired)
            }
            Some(session) => Ok(SessionLookup::Found(session)),
        }
    }

    /// Swap the session's token for `new_raw_token`, only if it still holds `old_hash`
    ///
    /// # Errors
    /// Returns error if the database operation fails or times out
    pub async fn rotate(
        &self,
        session_id: Uuid,
        old_hash: &str,
        new_raw_token: &str,
    ) -> Result<Rotation, DatabaseError> {
        let new_hash = self.hash_token(new_raw_token);
        let rotated = with_timeout(
            self.timeout,
            self.sessions
                .replace_hash(session_id, old_hash, &new_hash, Utc::now()),
        )
        .await?;

        match rotated {
            Some(session) => Ok(Rotation::Rotated(session)),
            None => {
                tracing::warn!(session_id = %session_id, "Refresh rotation lost to a concurrent rotation");
                Ok(Rotation::Conflict)
            }
        }
    }

    /// Delete the session holding `raw_token`; deleting nothing is not an error
    ///
    /// # Errors
    /// Returns error if the database operation fails or times out
    pub async fn delete_by_token(&self, raw_token: &str) -> Result<(), DatabaseError> {
        let token_hash = self.hash_token(raw_token);
        let deleted = with_timeout(self.timeout, self.sessions.delete_by_hash(&token_hash)).await?;
        tracing::debug!(deleted, "Refresh session deleted by token");
        Ok(())
    }

    /// Delete a session by id; deleting nothing is not an error
    ///
    /// # Errors
    /// Returns error if the database operation fails or times out
    pub async fn delete_by_session_id(&self, session_id: Uuid) -> Result<(), DatabaseError> {
        let deleted = with_timeout(self.timeout, self.sessions.delete_by_id(session_id)).await?;
        tracing::debug!(session_id = %session_id, deleted, "Refresh session deleted");
        Ok(())
    }
}
