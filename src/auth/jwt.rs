/// Access Token Issuer
///
/// Signs and verifies short-lived HS256 access tokens. The server keeps no
/// record of issued tokens: validity is the signature plus the embedded expiry.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::{AccessPayload, Claims};
use crate::configuration::AuthSettings;
use crate::error::AppError;

/// Result of checking an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerification {
    /// Bad signature, wrong issuer or malformed token
    Invalid,
    /// Valid signature, expiry elapsed
    Expired,
    Valid(AccessPayload),
}

/// Immutable signing configuration, built once at startup
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    expiry_seconds: i64,
}

impl TokenIssuer {
    pub fn new(settings: &AuthSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Verify issuer matches configuration
        validation.set_issuer(&[&settings.issuer]);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
            validation,
            issuer: settings.issuer.clone(),
            expiry_seconds: settings.access_token_expiry,
        }
    }

    /// Lifetime of issued tokens, in seconds
    pub fn expires_in(&self) -> i64 {
        self.expiry_seconds
    }

    /// Sign a new access token for `payload`
    ///
    /// # Errors
    /// Returns error if token encoding fails
    pub fn sign(&self, payload: &AccessPayload) -> Result<String, AppError> {
        let claims = Claims::new(payload, self.expiry_seconds, self.issuer.clone());

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify an access token
    ///
    /// Callers must treat `Invalid` and `Expired` the same way towards clients.
    pub fn verify(&self, token: &str) -> TokenVerification {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => match data.claims.payload() {
                Some(payload) => TokenVerification::Valid(payload),
                None => {
                    tracing::warn!("Access token carries a malformed subject");
                    TokenVerification::Invalid
                }
            },
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                tracing::debug!("Access token expired");
                TokenVerification::Expired
            }
            Err(e) => {
                tracing::warn!("Access token validation error: {}", e);
                TokenVerification::Invalid
            }
        }
    }
}
