/// JWT Claims structure
///
/// Represents the payload of an access token: the user identity plus the
/// standard JWT claims (RFC 7519).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity carried by an access token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AccessPayload {
    pub id: Uuid,
    pub username: String,
}

/// JWT Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    pub username: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub iss: String,
}

impl Claims {
    /// Create new claims for a user
    ///
    /// # Arguments
    /// * `payload` - Identity to embed
    /// * `expiry_seconds` - Token expiration in seconds from now
    /// * `issuer` - Issuer identifier
    pub fn new(payload: &AccessPayload, expiry_seconds: i64, issuer: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: payload.id.to_string(),
            username: payload.username.clone(),
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
        }
    }

    /// Extract the identity from the claims
    ///
    /// Returns `None` if the subject is not a valid UUID.
    pub fn payload(&self) -> Option<AccessPayload> {
        Uuid::parse_str(&self.sub).ok().map(|id| AccessPayload {
            id,
            username: self.username.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> AccessPayload {
        AccessPayload {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
        }
    }

    #[test]
    fn test_claims_creation() {
        let payload = payload();
        let claims = Claims::new(&payload, 3600, "test".to_string());

        assert_eq!(claims.sub, payload.id.to_string());
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.iss, "test");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = payload();
        let claims = Claims::new(&payload, 3600, "test".to_string());

        assert_eq!(claims.payload(), Some(payload));
    }

    #[test]
    fn test_invalid_subject() {
        let mut claims = Claims::new(&payload(), 3600, "test".to_string());
        claims.sub = "invalid-uuid".to_string();

        assert!(claims.payload().is_none());
    }
}
