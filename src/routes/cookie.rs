use actix_web::cookie::{time::Duration, Cookie};
use actix_web::HttpRequest;

use crate::configuration::CookieSettings;

/// Builds and reads the HTTP-only refresh token cookie.
#[derive(Clone)]
pub struct RefreshCookie {
    settings: CookieSettings,
    max_age: Duration,
}

impl RefreshCookie {
    pub fn new(settings: CookieSettings, max_age: Duration) -> Self {
        Self { settings, max_age }
    }

    pub fn issue(&self, raw_token: String) -> Cookie<'static> {
        Cookie::build(self.settings.name.clone(), raw_token)
            .http_only(true)
            .secure(self.settings.secure)
            .same_site(self.settings.same_site.into())
            .path(self.settings.path.clone())
            .max_age(self.max_age)
            .finish()
    }

    /// Expired, empty cookie that makes the client drop its refresh token
    pub fn removal(&self) -> Cookie<'static> {
        let mut cookie = self.issue(String::new());
        cookie.make_removal();
        cookie
    }

    pub fn read(&self, req: &HttpRequest) -> Option<String> {
        req.cookie(&self.settings.name)
            .map(|c| c.value().to_string())
            .filter(|value| !value.is_empty())
    }
}
