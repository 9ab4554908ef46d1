use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    NewReading, NewSession, NewUser, Reading, ReadingRepository, RefreshSession,
    SessionRepository, User, UserRepository,
};
use crate::error::DatabaseError;

/// PostgreSQL-backed store; schema lives in `migrations/`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, DatabaseError> {
        let now = Utc::now();

        // Uniqueness is enforced by the users_username_key constraint, not pre-checked
        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING id, username, password_hash, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }
}

#[async_trait]
impl SessionRepository for PostgresStore {
    async fn insert_session(&self, session: NewSession) -> Result<RefreshSession, DatabaseError> {
        let created = sqlx::query_as::<_, RefreshSession>(
            r#"
            INSERT INTO refresh_tokens (id, user_id, username, token_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, username, token_hash, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session.user_id)
        .bind(&session.username)
        .bind(&session.token_hash)
        .bind(session.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, DatabaseError> {
        let session = sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT id, user_id, username, token_hash, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn replace_hash(
        &self,
        id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        rotated_at: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, DatabaseError> {
        // Single conditional statement: the row lock taken by UPDATE makes the
        // second of two racing rotations see the new hash and match nothing.
        let rotated = sqlx::query_as::<_, RefreshSession>(
            r#"
            UPDATE refresh_tokens
            SET token_hash = $1, created_at = $2
            WHERE id = $3 AND token_hash = $4
            RETURNING id, user_id, username, token_hash, created_at
            "#,
        )
        .bind(new_hash)
        .bind(rotated_at)
        .bind(id)
        .bind(expected_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(rotated)
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ReadingRepository for PostgresStore {
    async fn insert_reading(&self, reading: NewReading) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO readings (id, user_id, room, temperature, humidity, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reading.user_id)
        .bind(&reading.room)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn readings_since(
        &self,
        user_id: Uuid,
        room: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>, DatabaseError> {
        let readings = sqlx::query_as::<_, Reading>(
            r#"
            SELECT room, temperature, humidity, created_at
            FROM readings
            WHERE user_id = $1
              AND ($2::varchar IS NULL OR room = $2)
              AND created_at >= $3
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(room)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(readings)
    }
}
