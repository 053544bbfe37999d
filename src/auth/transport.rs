/// Refresh credential transport
///
/// Two mutually exclusive encodings, picked once at startup from
/// `TransportSettings` and never negotiated per request:
/// - cookie: HttpOnly cookie scoped to the auth path
/// - header: response header, echoed back by the client in the JSON body
///
/// Adapters only move the credential in and out of HTTP messages; they make
/// no authorization decisions.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{HttpRequest, HttpResponseBuilder};
use std::sync::Arc;

use crate::auth::refresh_token::CompositeToken;
use crate::configuration::{TransportMode, TransportSettings};

pub trait RefreshTransport: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// Put a freshly issued credential on the response
    fn attach(&self, req: &HttpRequest, response: &mut HttpResponseBuilder, credential: &CompositeToken);

    /// Tell the client to drop its credential (logout)
    fn clear(&self, req: &HttpRequest, response: &mut HttpResponseBuilder);

    /// Pull the presented credential from the request, if any
    fn extract(&self, req: &HttpRequest, body_token: Option<&str>) -> Option<String>;
}

pub struct CookieTransport {
    name: String,
    path: String,
    same_site: SameSite,
    max_age_seconds: i64,
}

impl CookieTransport {
    pub fn new(settings: &TransportSettings, max_age_seconds: i64) -> Self {
        Self {
            name: settings.cookie_name.clone(),
            path: settings.cookie_path.clone(),
            same_site: settings.same_site.into(),
            max_age_seconds,
        }
    }

    fn build(&self, req: &HttpRequest, value: String) -> Cookie<'static> {
        // Secure only on https origins so plain-http local development works
        let secure = req.connection_info().scheme() == "https";
        Cookie::build(self.name.clone(), value)
            .path(self.path.clone())
            .http_only(true)
            .secure(secure)
            .same_site(self.same_site)
            .max_age(CookieDuration::seconds(self.max_age_seconds))
            .finish()
    }
}

impl RefreshTransport for CookieTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Cookie
    }

    fn attach(&self, req: &HttpRequest, response: &mut HttpResponseBuilder, credential: &CompositeToken) {
        response.cookie(self.build(req, credential.encode()));
    }

    fn clear(&self, req: &HttpRequest, response: &mut HttpResponseBuilder) {
        let mut cookie = self.build(req, String::new());
        cookie.make_removal();
        response.cookie(cookie);
    }

    fn extract(&self, req: &HttpRequest, _body_token: Option<&str>) -> Option<String> {
        req.cookie(&self.name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }
}

pub struct HeaderTransport {
    header_name: String,
}

impl HeaderTransport {
    pub fn new(settings: &TransportSettings) -> Self {
        Self {
            header_name: settings.header_name.clone(),
        }
    }
}

impl RefreshTransport for HeaderTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Header
    }

    fn attach(&self, _req: &HttpRequest, response: &mut HttpResponseBuilder, credential: &CompositeToken) {
        response.insert_header((self.header_name.as_str(), credential.encode()));
    }

    // Nothing to clear: the client holds the credential itself
    fn clear(&self, _req: &HttpRequest, _response: &mut HttpResponseBuilder) {}

    fn extract(&self, _req: &HttpRequest, body_token: Option<&str>) -> Option<String> {
        body_token
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Select the transport for this process
pub fn transport_from_settings(
    settings: &TransportSettings,
    refresh_token_expiry: i64,
) -> Arc<dyn RefreshTransport> {
    match settings.mode {
        TransportMode::Cookie => Arc::new(CookieTransport::new(settings, refresh_token_expiry)),
        TransportMode::Header => Arc::new(HeaderTransport::new(settings)),
    }
}
