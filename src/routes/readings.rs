/// Reading Routes
///
/// Protected by the bearer token middleware, which puts the caller's
/// `AccessPayload` into request extensions.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::AccessPayload;
use crate::error::AppError;
use crate::readings::ReadingStore;

#[derive(Deserialize)]
pub struct ReadingRequest {
    pub temperature: f32,
    pub humidity: f32,
    pub room: String,
}

/// GET /readings
pub async fn list_readings(
    user: web::ReqData<AccessPayload>,
    readings: web::Data<ReadingStore>,
) -> Result<HttpResponse, AppError> {
    let rows = readings.recent(user.id, None).await?;
    Ok(HttpResponse::Ok().json(rows))
}

/// GET /readings/{room}
///
/// # Errors
/// - 400: Empty room name or control characters in it
pub async fn room_readings(
    user: web::ReqData<AccessPayload>,
    room: web::Path<String>,
    readings: web::Data<ReadingStore>,
) -> Result<HttpResponse, AppError> {
    let rows = readings.recent(user.id, Some(room.as_str())).await?;
    Ok(HttpResponse::Ok().json(rows))
}

/// POST /readings
///
/// # Errors
/// - 400: Empty room or out of range values
/// - 500: Storage failure
pub async fn create_reading(
    user: web::ReqData<AccessPayload>,
    form: web::Json<ReadingRequest>,
    readings: web::Data<ReadingStore>,
) -> Result<HttpResponse, AppError> {
    readings
        .record(user.id, &form.room, form.temperature, form.humidity)
        .await?;

    tracing::debug!(user_id = %user.id, "Reading stored");

    Ok(HttpResponse::Created().finish())
}
