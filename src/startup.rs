use actix_web::dev::Server;
use actix_web::{error::JsonPayloadError, web, App, HttpRequest, HttpServer};
use std::net::TcpListener;

use crate::auth::SessionProtocol;
use crate::error::{AppError, ValidationError};
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::readings::ReadingStore;
use crate::routes::{
    create_reading, device_login, health_check, list_readings, login, logoff, logout, me,
    refresh, room_readings, signup, RefreshCookie,
};

/// Request bodies are tiny; anything larger is rejected before parsing.
const JSON_LIMIT_BYTES: usize = 4096;

/// Components shared by every worker
pub struct AppState {
    pub protocol: SessionProtocol,
    pub readings: ReadingStore,
    pub cookie: RefreshCookie,
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    tracing::debug!(error = %err, "Rejected request body");
    AppError::Validation(ValidationError::InvalidFormat("request body")).into()
}

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let tokens = state.protocol.tokens().clone();
    let protocol = web::Data::new(state.protocol);
    let readings = web::Data::new(state.readings);
    let cookie = web::Data::new(state.cookie);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(LoggerMiddleware)
            .app_data(
                web::JsonConfig::default()
                    .limit(JSON_LIMIT_BYTES)
                    .error_handler(json_error),
            )
            .app_data(protocol.clone())
            .app_data(readings.clone())
            .app_data(cookie.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/signup", web::post().to(signup))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/me", web::get().to(me))
                    .route("/logout", web::post().to(logout))
                    .route("/logoff", web::get().to(logoff)),
            )
            .route("/pi/login", web::post().to(device_login))
            .service(
                web::scope("/readings")
                    .wrap(JwtMiddleware::new(tokens.clone()))
                    .route("", web::get().to(list_readings))
                    .route("", web::post().to(create_reading))
                    .route("/{room}", web::get().to(room_readings)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
