/// Password Hashing and Verification
///
/// bcrypt is deliberately slow, so hashing runs on the blocking thread pool
/// and at most `max_concurrent` hashes run at once. Login and signup floods
/// queue on the semaphore instead of starving the request workers.

use bcrypt::{hash, verify};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::AppError;

/// Below this cost a single hash takes well under 10ms on current hardware.
const MIN_RECOMMENDED_COST: u32 = 10;

#[derive(Clone)]
pub struct PasswordHasher {
    cost: u32,
    permits: Arc<Semaphore>,
}

impl PasswordHasher {
    pub fn new(cost: u32, max_concurrent: usize) -> Self {
        if cost < MIN_RECOMMENDED_COST {
            tracing::warn!(cost, "bcrypt cost is below the recommended minimum");
        }

        Self {
            cost,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Hash a password with a fresh salt
    ///
    /// # Errors
    /// Returns error if bcrypt fails or the worker is cancelled
    pub async fn hash(&self, password: &str) -> Result<String, AppError> {
        let password = password.to_string();
        let cost = self.cost;

        self.run_blocking(move || hash(password, cost)).await
    }

    /// Verify a password against its hash in constant time
    ///
    /// # Errors
    /// Returns error if the stored hash is malformed or the worker is cancelled
    pub async fn verify(&self, password: &str, password_hash: &str) -> Result<bool, AppError> {
        let password = password.to_string();
        let password_hash = password_hash.to_string();

        self.run_blocking(move || verify(password, &password_hash)).await
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Result<T, bcrypt::BcryptError> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::Internal("Password hasher is shut down".to_string()))?;

        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| AppError::Internal(format!("Password worker failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hasher() -> PasswordHasher {
        PasswordHasher::new(4, 2)
    }

    #[tokio::test]
    async fn test_hash_password() {
        let password = "pw1";
        let hash = test_hasher().hash(password).await.expect("Failed to hash password");

        // Hash should not be the same as password
        assert_ne!(password, hash);
        // Hash should start with bcrypt identifier
        assert!(hash.starts_with("$2"));
    }

    #[tokio::test]
    async fn test_same_password_gets_different_salts() {
        let hasher = test_hasher();
        let first = hasher.hash("pw1").await.unwrap();
        let second = hasher.hash("pw1").await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_verify_password() {
        let hasher = test_hasher();
        let hash = hasher.hash("ValidPassword123").await.unwrap();

        assert!(hasher.verify("ValidPassword123", &hash).await.unwrap());
        assert!(!hasher.verify("WrongPassword123", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_hash_is_an_error() {
        let result = test_hasher().verify("pw1", "not-a-bcrypt-hash").await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn test_concurrent_hashes_share_bounded_permits() {
        let hasher = PasswordHasher::new(4, 1);
        let (a, b, c) = tokio::join!(hasher.hash("a"), hasher.hash("b"), hasher.hash("c"));

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(hasher.permits.available_permits(), 1);
    }
}
