/// Persistence layer
///
/// The service talks to storage through three narrow async traits so the
/// authentication flows can run against PostgreSQL in production and an
/// in-process store in tests. Every call made by the service layer is
/// wrapped in [`with_timeout`].

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::error::DatabaseError;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Identity record
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
}

/// One live login session, keyed by the hash of its current refresh token
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RefreshSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub token_hash: String,
    /// Time of creation or last rotation; the expiry window starts here
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub username: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Sensor reading as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Reading {
    pub room: String,
    pub temperature: f32,
    pub humidity: f32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReading {
    pub user_id: Uuid,
    pub room: String,
    pub temperature: f32,
    pub humidity: f32,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError>;

    /// Fails with `UniqueConstraintViolation` when the username is taken.
    async fn insert_user(&self, user: NewUser) -> Result<User, DatabaseError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert_session(&self, session: NewSession) -> Result<RefreshSession, DatabaseError>;

    async fn find_by_hash(&self, token_hash: &str)
        -> Result<Option<RefreshSession>, DatabaseError>;

    /// Compare-and-swap on `token_hash`.
    ///
    /// Sets `token_hash` and `created_at` together only while the stored hash
    /// still equals `expected_hash`; returns `None` when it does not (or the
    /// row is gone).
    async fn replace_hash(
        &self,
        id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        rotated_at: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, DatabaseError>;

    /// Returns the number of deleted rows.
    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64, DatabaseError>;

    async fn delete_by_id(&self, id: Uuid) -> Result<u64, DatabaseError>;
}

#[async_trait]
pub trait ReadingRepository: Send + Sync {
    async fn insert_reading(&self, reading: NewReading) -> Result<(), DatabaseError>;

    /// Newest first.
    async fn readings_since(
        &self,
        user_id: Uuid,
        room: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>, DatabaseError>;
}

/// Bounds a store call; an elapsed deadline surfaces as `DatabaseError::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> Result<T, DatabaseError>
where
    F: Future<Output = Result<T, DatabaseError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(timeout_ms = limit.as_millis() as u64, "Store call timed out");
            Err(DatabaseError::Timeout)
        }
    }
}
