use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use telemetry_backend::auth::SessionProtocol;
use telemetry_backend::configuration::get_configuration;
use telemetry_backend::readings::ReadingStore;
use telemetry_backend::routes::RefreshCookie;
use telemetry_backend::startup::{run, AppState};
use telemetry_backend::store::PostgresStore;
use telemetry_backend::telemetry::init_telemetry;

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = init_telemetry("info") {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }

    let configuration = get_configuration().map_err(|e| {
        tracing::error!(error = %e, "Failed to read configuration");
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    let store_timeout = configuration.database.timeout();

    tracing::info!(
        host = %configuration.database.host,
        database = %configuration.database.database_name,
        "Connecting to database"
    );
    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .acquire_timeout(store_timeout)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create connection pool");
            startup_error(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            startup_error(std::io::ErrorKind::Other, "Migration error")
        })?;

    let store = Arc::new(PostgresStore::new(pool));
    let protocol = SessionProtocol::from_settings(
        &configuration.auth,
        store_timeout,
        store.clone(),
        store.clone(),
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to build session protocol");
        startup_error(std::io::ErrorKind::InvalidInput, "Auth configuration error")
    })?;

    let state = AppState {
        protocol,
        readings: ReadingStore::new(store, store_timeout),
        cookie: RefreshCookie::new(
            configuration.cookie.clone(),
            configuration.auth.refresh_token_max_age(),
        ),
    };

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!(address = %address, "Server listening");

    run(listener, state)?.await
}
