mod auth;
mod cookie;
mod health_check;
mod readings;

pub use auth::{
    device_login, login, logoff, logout, me, refresh, signup, AuthResponse, CredentialsRequest,
};
pub use cookie::RefreshCookie;
pub use health_check::health_check;
pub use readings::{create_reading, list_readings, room_readings, ReadingRequest};
