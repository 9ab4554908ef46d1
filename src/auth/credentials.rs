/// Credential Store
///
/// Verifies and creates username/password identities.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::password::PasswordHasher;
use crate::error::{AppError, DatabaseError};
use crate::store::{with_timeout, NewUser, User, UserRepository};
use crate::validators::{is_valid_username, MAX_PASSWORD_BYTES};

/// Outcome of checking a username/password pair
#[derive(Debug, Clone, PartialEq)]
pub enum Authentication {
    UserNotFound,
    InvalidPassword,
    Authenticated(User),
}

/// Outcome of creating a user
#[derive(Debug, Clone, PartialEq)]
pub enum UserCreation {
    Created(User),
    /// The username is already taken
    Conflict,
}

#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserRepository>,
    hasher: PasswordHasher,
    timeout: Duration,
    /// Verified against when the username is unknown, so both failure paths cost one bcrypt run
    dummy_hash: String,
}

impl CredentialStore {
    /// # Errors
    /// Returns error if the dummy hash cannot be computed
    pub async fn new(
        users: Arc<dyn UserRepository>,
        hasher: PasswordHasher,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let dummy_hash = hasher.hash("dummy-password-for-unknown-users").await?;

        Ok(Self {
            users,
            hasher,
            timeout,
            dummy_hash,
        })
    }

    /// Check `password` against the stored hash for `username`
    ///
    /// A username that could never have been stored counts as unknown and
    /// skips the lookup. Passwords past the bcrypt input limit never match.
    ///
    /// # Errors
    /// Returns error if the store fails, times out, or the stored hash is unreadable
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Authentication, AppError> {
        let user = match is_valid_username(username) {
            Ok(username) => {
                with_timeout(self.timeout, self.users.find_by_username(&username)).await?
            }
            Err(e) => {
                tracing::debug!(error = %e, "Login username rejected before lookup");
                None
            }
        };

        let Some(user) = user else {
            let _ = self.hasher.verify(password, &self.dummy_hash).await?;
            tracing::info!("Login attempt for unknown username");
            return Ok(Authentication::UserNotFound);
        };

        // bcrypt ignores everything after byte 72, so verify alone would accept longer variants
        let matches = self.hasher.verify(password, &user.password_hash).await?;
        if !matches || password.len() > MAX_PASSWORD_BYTES {
            tracing::info!(user_id = %user.id, "Login attempt with wrong password");
            return Ok(Authentication::InvalidPassword);
        }

        Ok(Authentication::Authenticated(user))
    }

    /// Hash `password` and insert a new user
    ///
    /// Duplicate usernames are detected by the unique constraint on insert,
    /// never by a prior lookup.
    ///
    /// # Errors
    /// Returns error on any storage failure other than the unique violation
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserCreation, AppError> {
        let password_hash = self.hasher.hash(password).await?;
        let new_user = NewUser {
            username: username.to_string(),
            password_hash,
        };

        match with_timeout(self.timeout, self.users.insert_user(new_user)).await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "User created");
                Ok(UserCreation::Created(user))
            }
            Err(DatabaseError::UniqueConstraintViolation(_)) => {
                tracing::info!("Signup attempt for existing username");
                Ok(UserCreation::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn credential_store() -> CredentialStore {
        CredentialStore::new(
            Arc::new(MemoryStore::new()),
            PasswordHasher::new(4, 2),
            Duration::from_secs(1),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_authenticate() {
        let store = credential_store().await;

        let UserCreation::Created(created) = store.create_user("alice", "pw1").await.unwrap() else {
            panic!("Expected user to be created");
        };
        assert_ne!(created.password_hash, "pw1");

        match store.authenticate("alice", "pw1").await.unwrap() {
            Authentication::Authenticated(user) => assert_eq!(user.id, created.id),
            other => panic!("Expected authentication, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let store = credential_store().await;
        store.create_user("alice", "pw1").await.unwrap();

        assert_eq!(
            store.authenticate("alice", "pw2").await.unwrap(),
            Authentication::InvalidPassword
        );
    }

    #[tokio::test]
    async fn test_password_differing_past_bcrypt_limit_is_rejected() {
        let store = credential_store().await;
        let stored = "x".repeat(72);
        store.create_user("alice", &stored).await.unwrap();

        let longer = format!("{}DIFFERENT-SUFFIX", stored);
        assert_eq!(
            store.authenticate("alice", &longer).await.unwrap(),
            Authentication::InvalidPassword
        );
        assert!(matches!(
            store.authenticate("alice", &stored).await.unwrap(),
            Authentication::Authenticated(_)
        ));
    }

    #[tokio::test]
    async fn test_unstorable_username_is_unknown() {
        let store = credential_store().await;
        store.create_user("alice", "pw1").await.unwrap();

        let too_long = "a".repeat(129);
        for username in ["ali\0ce", "", too_long.as_str()] {
            assert_eq!(
                store.authenticate(username, "pw1").await.unwrap(),
                Authentication::UserNotFound
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let store = credential_store().await;

        assert_eq!(
            store.authenticate("nobody", "pw1").await.unwrap(),
            Authentication::UserNotFound
        );
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts_regardless_of_password() {
        let store = credential_store().await;
        store.create_user("alice", "pw1").await.unwrap();

        assert_eq!(
            store.create_user("alice", "pw1").await.unwrap(),
            UserCreation::Conflict
        );
        assert_eq!(
            store.create_user("alice", "something-else").await.unwrap(),
            UserCreation::Conflict
        );
    }
}
