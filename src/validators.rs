/// Input validators module
/// Features:
/// 1. DoS Protection: Input length limits (bcrypt input included)
/// 2. Data integrity: usernames and room names fit their columns
/// 3. Control character rejection
/// 4. Sensor value sanity checks

use crate::error::ValidationError;

const MAX_USERNAME_LENGTH: usize = 128; // users.username varchar(128)
const MAX_ROOM_LENGTH: usize = 128; // readings.room varchar(128)
pub const MAX_PASSWORD_BYTES: usize = 72; // bcrypt only reads the first 72 bytes

/// Validates a username
/// - Trims surrounding whitespace
/// - Checks length constraints
/// - Rejects control characters
pub fn is_valid_username(username: &str) -> Result<String, ValidationError> {
    is_valid_label(username, "username", MAX_USERNAME_LENGTH)
}

/// Validates a password before it reaches the hasher
///
/// No composition rules are imposed; only emptiness and the bcrypt input
/// limit are enforced, so two passwords differing after byte 72 never
/// collide silently.
pub fn is_valid_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password"));
    }

    if password.len() > MAX_PASSWORD_BYTES {
        return Err(ValidationError::TooLong("password", MAX_PASSWORD_BYTES));
    }

    if password.contains('\0') {
        return Err(ValidationError::SuspiciousContent("password"));
    }

    Ok(())
}

/// Validates a room name used to group sensor readings
pub fn is_valid_room(room: &str) -> Result<String, ValidationError> {
    is_valid_label(room, "room", MAX_ROOM_LENGTH)
}

/// Validates a temperature (°C) / relative humidity (%) pair
pub fn is_valid_reading(temperature: f32, humidity: f32) -> Result<(), ValidationError> {
    if !temperature.is_finite() {
        return Err(ValidationError::InvalidFormat("temperature"));
    }

    if !humidity.is_finite() {
        return Err(ValidationError::InvalidFormat("humidity"));
    }

    if !(0.0..=100.0).contains(&humidity) {
        return Err(ValidationError::OutOfRange("humidity"));
    }

    Ok(())
}

fn is_valid_label(
    value: &str,
    field: &'static str,
    max_length: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field));
    }

    if trimmed.chars().count() > max_length {
        return Err(ValidationError::TooLong(field, max_length));
    }

    // Null bytes and other control characters
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ValidationError::SuspiciousContent(field));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_username() {
        assert_eq!(is_valid_username("alice").unwrap(), "alice");
        assert_eq!(is_valid_username("  bob  ").unwrap(), "bob");
        assert!(is_valid_username("Jean-Pierre O'Brien").is_ok());
    }

    #[test]
    fn test_username_length_limits() {
        assert_eq!(
            is_valid_username("   "),
            Err(ValidationError::EmptyField("username"))
        );
        assert!(is_valid_username(&"a".repeat(128)).is_ok());
        assert_eq!(
            is_valid_username(&"a".repeat(129)),
            Err(ValidationError::TooLong("username", 128))
        );
    }

    #[test]
    fn test_control_characters() {
        assert!(is_valid_username("name\0with\0null").is_err());
        assert!(is_valid_room("kitchen\n").is_ok()); // trailing newline is trimmed
        assert!(is_valid_room("kit\nchen").is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(is_valid_password("pw1").is_ok());
        assert!(is_valid_password(&"x".repeat(72)).is_ok());
        assert_eq!(
            is_valid_password(""),
            Err(ValidationError::EmptyField("password"))
        );
        assert_eq!(
            is_valid_password(&"x".repeat(73)),
            Err(ValidationError::TooLong("password", 72))
        );
    }

    #[test]
    fn test_reading_values() {
        assert!(is_valid_reading(21.5, 40.0).is_ok());
        assert!(is_valid_reading(-12.0, 0.0).is_ok());
        assert!(is_valid_reading(f32::NAN, 40.0).is_err());
        assert!(is_valid_reading(20.0, f32::INFINITY).is_err());
        assert_eq!(
            is_valid_reading(20.0, 101.0),
            Err(ValidationError::OutOfRange("humidity"))
        );
    }
}
