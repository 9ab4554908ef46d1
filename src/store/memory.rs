use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    NewReading, NewSession, NewUser, Reading, ReadingRepository, RefreshSession,
    SessionRepository, User, UserRepository,
};
use crate::error::DatabaseError;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, RefreshSession>,
    readings: Vec<(Uuid, Reading)>,
}

/// In-process store with the same constraints as the SQL schema:
/// unique usernames, unique token hashes, sessions referencing an existing
/// user, and a conditional hash swap.
///
/// All tables sit behind one mutex so each trait call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.tables.lock().sessions.len()
    }

    /// Removes a user and, like `ON DELETE CASCADE`, every session and reading they own.
    pub fn delete_user(&self, user_id: Uuid) -> bool {
        let mut tables = self.tables.lock();
        let removed = tables.users.remove(&user_id).is_some();
        tables.sessions.retain(|_, session| session.user_id != user_id);
        tables.readings.retain(|(owner, _)| *owner != user_id);
        removed
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        let tables = self.tables.lock();
        Ok(tables
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, DatabaseError> {
        let mut tables = self.tables.lock();
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "users_username_key".to_string(),
            ));
        }

        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(created.id, created.clone());

        Ok(created)
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert_session(&self, session: NewSession) -> Result<RefreshSession, DatabaseError> {
        let mut tables = self.tables.lock();
        if !tables.users.contains_key(&session.user_id) {
            return Err(DatabaseError::QueryExecution(
                "refresh_tokens_user_id_fkey".to_string(),
            ));
        }
        if tables
            .sessions
            .values()
            .any(|s| s.token_hash == session.token_hash)
        {
            return Err(DatabaseError::UniqueConstraintViolation(
                "refresh_tokens_token_hash_key".to_string(),
            ));
        }

        let created = RefreshSession {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            username: session.username,
            token_hash: session.token_hash,
            created_at: session.created_at,
        };
        tables.sessions.insert(created.id, created.clone());

        Ok(created)
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, DatabaseError> {
        let tables = self.tables.lock();
        Ok(tables
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn replace_hash(
        &self,
        id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        rotated_at: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, DatabaseError> {
        let mut tables = self.tables.lock();
        if tables
            .sessions
            .values()
            .any(|s| s.id != id && s.token_hash == new_hash)
        {
            return Err(DatabaseError::UniqueConstraintViolation(
                "refresh_tokens_token_hash_key".to_string(),
            ));
        }

        match tables.sessions.get_mut(&id) {
            Some(session) if session.token_hash == expected_hash => {
                session.token_hash = new_hash.to_string();
                session.created_at = rotated_at;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64, DatabaseError> {
        let mut tables = self.tables.lock();
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.token_hash != token_hash);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<u64, DatabaseError> {
        let mut tables = self.tables.lock();
        Ok(tables.sessions.remove(&id).map_or(0, |_| 1))
    }
}

#[async_trait]
impl ReadingRepository for MemoryStore {
    async fn insert_reading(&self, reading: NewReading) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock();
        if !tables.users.contains_key(&reading.user_id) {
            return Err(DatabaseError::QueryExecution(
                "readings_user_id_fkey".to_string(),
            ));
        }

        tables.readings.push((
            reading.user_id,
            Reading {
                room: reading.room,
                temperature: reading.temperature,
                humidity: reading.humidity,
                created_at: Utc::now(),
            },
        ));

        Ok(())
    }

    async fn readings_since(
        &self,
        user_id: Uuid,
        room: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>, DatabaseError> {
        let tables = self.tables.lock();
        let mut readings: Vec<Reading> = tables
            .readings
            .iter()
            .filter(|(owner, r)| {
                *owner == user_id
                    && room.map_or(true, |room| r.room == room)
                    && r.created_at >= since
            })
            .map(|(_, r)| r.clone())
            .collect();
        readings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(readings)
    }
}
