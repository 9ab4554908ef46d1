/// Authentication module
///
/// Password-based authentication, stateless access tokens and rotating
/// refresh sessions.

mod claims;
mod credentials;
mod jwt;
mod password;
mod refresh_token;
mod session;

pub use claims::{AccessPayload, Claims};
pub use credentials::{Authentication, CredentialStore, UserCreation};
pub use jwt::{TokenIssuer, TokenVerification};
pub use password::PasswordHasher;
pub use refresh_token::{
    generate_refresh_token, RefreshSessionStore, Rotation, SessionLookup, SessionWindow,
    TokenHasher,
};
pub use session::{IssuedSession, ResolvedIdentity, SessionProtocol};
