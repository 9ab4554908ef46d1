/// Authentication Routes
///
/// Signup, login, refresh, "who am I" and logout. The refresh token only
/// ever travels in the HTTP-only cookie; bodies carry the access token.

use actix_web::cookie::Cookie;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{AccessPayload, IssuedSession, ResolvedIdentity, SessionProtocol};
use crate::error::{AppError, AuthError};
use crate::middleware::bearer_token;
use crate::routes::cookie::RefreshCookie;

/// Signup and login request body
#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

/// Access token response
#[derive(Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: AccessPayload,
}

impl AuthResponse {
    fn new(access_token: String, user: AccessPayload, protocol: &SessionProtocol) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: protocol.tokens().expires_in(),
            user,
        }
    }
}

fn session_response(
    mut builder: actix_web::HttpResponseBuilder,
    issued: IssuedSession,
    protocol: &SessionProtocol,
    cookie: &RefreshCookie,
) -> HttpResponse {
    builder
        .cookie(cookie.issue(issued.refresh_token))
        .json(AuthResponse::new(issued.access_token, issued.user, protocol))
}

fn error_with_cookie(error: AppError, cookie: Cookie<'static>) -> HttpResponse {
    let (mut builder, body) = error.response_builder();
    builder.cookie(cookie).json(body)
}

/// POST /auth/signup
///
/// # Errors
/// - 400: Invalid username or password
/// - 409: Username already taken
/// - 500: Storage failure
pub async fn signup(
    form: web::Json<CredentialsRequest>,
    protocol: web::Data<SessionProtocol>,
    cookie: web::Data<RefreshCookie>,
) -> Result<HttpResponse, AppError> {
    let issued = protocol.signup(&form.username, &form.password).await?;

    Ok(session_response(
        HttpResponse::Created(),
        issued,
        &protocol,
        &cookie,
    ))
}

/// POST /auth/login
///
/// Unknown usernames and wrong passwords get the same 401.
pub async fn login(
    form: web::Json<CredentialsRequest>,
    protocol: web::Data<SessionProtocol>,
    cookie: web::Data<RefreshCookie>,
) -> Result<HttpResponse, AppError> {
    let issued = protocol.login(&form.username, &form.password).await?;

    Ok(session_response(HttpResponse::Ok(), issued, &protocol, &cookie))
}

/// POST /auth/refresh
///
/// Rotates the refresh cookie. A missing, unknown, expired or already used
/// token gets a 400 and the cookie is cleared.
pub async fn refresh(
    req: HttpRequest,
    protocol: web::Data<SessionProtocol>,
    cookie: web::Data<RefreshCookie>,
) -> Result<HttpResponse, AppError> {
    let Some(raw) = cookie.read(&req) else {
        return Ok(error_with_cookie(
            AuthError::InvalidRefreshToken.into(),
            cookie.removal(),
        ));
    };

    match protocol.refresh(&raw).await {
        Ok(issued) => Ok(session_response(HttpResponse::Ok(), issued, &protocol, &cookie)),
        Err(e @ AppError::Auth(AuthError::InvalidRefreshToken)) => {
            Ok(error_with_cookie(e, cookie.removal()))
        }
        Err(e) => Err(e),
    }
}

/// GET /auth/me
///
/// Accepts a bearer access token and falls back to the refresh cookie when
/// the access token is missing or unusable.
pub async fn me(
    req: HttpRequest,
    protocol: web::Data<SessionProtocol>,
    cookie: web::Data<RefreshCookie>,
) -> Result<HttpResponse, AppError> {
    let access_token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token);
    let refresh_token = cookie.read(&req);

    match protocol
        .resolve_identity(access_token, refresh_token.as_deref())
        .await
    {
        Ok(ResolvedIdentity::Current { access_token, user }) => {
            Ok(HttpResponse::Ok().json(AuthResponse::new(access_token, user, &protocol)))
        }
        Ok(ResolvedIdentity::Refreshed(issued)) => {
            tracing::info!(user_id = %issued.user.id, "Session refreshed on identity lookup");
            Ok(session_response(HttpResponse::Ok(), issued, &protocol, &cookie))
        }
        Err(e @ AppError::Auth(AuthError::InvalidAccessToken)) if refresh_token.is_some() => {
            Ok(error_with_cookie(e, cookie.removal()))
        }
        Err(e) => Err(e),
    }
}

/// POST /auth/logout
///
/// Always clears the cookie, even when revoking the session failed.
pub async fn logout(
    req: HttpRequest,
    protocol: web::Data<SessionProtocol>,
    cookie: web::Data<RefreshCookie>,
) -> HttpResponse {
    let refresh_token = cookie.read(&req);

    match protocol.logout(refresh_token.as_deref()).await {
        Ok(()) => HttpResponse::NoContent().cookie(cookie.removal()).finish(),
        Err(e) => error_with_cookie(e, cookie.removal()),
    }
}

/// GET /auth/logoff
///
/// Drops the refresh cookie on this client only; the session row stays
/// until it expires or is revoked through `/auth/logout`.
pub async fn logoff(cookie: web::Data<RefreshCookie>) -> HttpResponse {
    HttpResponse::NoContent().cookie(cookie.removal()).finish()
}

/// POST /pi/login
///
/// Credential check for sensor devices. Opens no session and sets no
/// cookie; failures get the same 401 as `/auth/login`.
pub async fn device_login(
    form: web::Json<CredentialsRequest>,
    protocol: web::Data<SessionProtocol>,
) -> Result<HttpResponse, AppError> {
    let device = protocol
        .verify_device(&form.username, &form.password)
        .await?;

    Ok(HttpResponse::Ok().json(device))
}
