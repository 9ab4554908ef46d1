/// Sensor readings
///
/// Temperature/humidity readings pushed by authenticated clients, scoped
/// to the user id carried by their access token.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::store::{with_timeout, NewReading, Reading, ReadingRepository};
use crate::validators::{is_valid_reading, is_valid_room};

/// Queries only look this many days back.
const LOOKBACK_DAYS: i64 = 30;

#[derive(Clone)]
pub struct ReadingStore {
    repository: Arc<dyn ReadingRepository>,
    timeout: std::time::Duration,
}

impl ReadingStore {
    pub fn new(repository: Arc<dyn ReadingRepository>, timeout: std::time::Duration) -> Self {
        Self {
            repository,
            timeout,
        }
    }

    /// # Errors
    /// Validation errors for bad values, server errors for storage failures
    pub async fn record(
        &self,
        user_id: Uuid,
        room: &str,
        temperature: f32,
        humidity: f32,
    ) -> Result<(), AppError> {
        let room = is_valid_room(room)?;
        is_valid_reading(temperature, humidity)?;

        let reading = NewReading {
            user_id,
            room,
            temperature,
            humidity,
        };
        with_timeout(self.timeout, self.repository.insert_reading(reading)).await?;

        Ok(())
    }

    /// Readings from the lookback window, newest first, optionally for one room
    ///
    /// # Errors
    /// Validation errors for a malformed room, server errors for storage failures
    pub async fn recent(&self, user_id: Uuid, room: Option<&str>) -> Result<Vec<Reading>, AppError> {
        let room = room.map(is_valid_room).transpose()?;
        let since = Utc::now() - Duration::days(LOOKBACK_DAYS);
        let readings = with_timeout(
            self.timeout,
            self.repository.readings_since(user_id, room.as_deref(), since),
        )
        .await?;

        Ok(readings)
    }
}
