use actix_web::cookie::SameSite;
use config::ConfigError;
use std::time::Duration;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub auth: AuthSettings,
    pub cookie: CookieSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub max_connections: u32,
    /// Upper bound for a single store call, in milliseconds.
    pub timeout_ms: u64,
}

impl DatabaseSettings {
    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }

    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Token signing, refresh session and password hashing settings
#[derive(serde::Deserialize, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub issuer: String,
    pub access_token_expiry: i64,       // seconds (e.g., 900 for 15 minutes)
    pub refresh_token_expiry_days: i64, // whole days
    pub refresh_hash_secret: String,
    pub bcrypt_cost: u32,
    pub max_concurrent_hashes: usize,
}

/// Longest refresh session window accepted from configuration.
const MAX_REFRESH_TOKEN_EXPIRY_DAYS: i64 = 3650;

impl AuthSettings {
    /// Reject lifetimes that are non-positive or too large for date arithmetic
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_REFRESH_TOKEN_EXPIRY_DAYS).contains(&self.refresh_token_expiry_days) {
            return Err(ConfigError::Message(format!(
                "auth.refresh_token_expiry_days must be between 1 and {}",
                MAX_REFRESH_TOKEN_EXPIRY_DAYS
            )));
        }

        if !(1..=MAX_REFRESH_TOKEN_EXPIRY_DAYS * 86_400).contains(&self.access_token_expiry) {
            return Err(ConfigError::Message(
                "auth.access_token_expiry is out of range".to_string(),
            ));
        }

        Ok(())
    }

    /// Cookie lifetime matching the refresh session window
    pub fn refresh_token_max_age(&self) -> actix_web::cookie::time::Duration {
        actix_web::cookie::time::Duration::days(self.refresh_token_expiry_days)
    }
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

/// Refresh token cookie policy
#[derive(serde::Deserialize, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub secure: bool,
    pub same_site: SameSitePolicy,
    pub path: String,
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .set_default("application.host", "127.0.0.1")?
        .set_default("database.max_connections", 5)?
        .set_default("database.timeout_ms", 5000)?
        .set_default("auth.issuer", "telemetry-backend")?
        .set_default("auth.access_token_expiry", 900)?
        .set_default("auth.refresh_token_expiry_days", 7)?
        .set_default("auth.bcrypt_cost", i64::from(bcrypt::DEFAULT_COST))?
        .set_default("auth.max_concurrent_hashes", 4)?
        .set_default("cookie.name", "refresh_token")?
        .set_default("cookie.secure", true)?
        .set_default("cookie.same_site", "strict")?
        .set_default("cookie.path", "/")?
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.auth.validate()?;

    Ok(settings)
}
