//! Credential strategies
//!
//! One interface, two implementations, picked once when the client is built:
//! [`TokenCredentials`] sends the access token as a bearer header, while
//! [`CookieCredentials`] leaves session cookies to the transport's cookie jar
//! and adds the anti-forgery header to state-changing requests.

use crate::client::error::RefreshError;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use reqwest::{Method, Request};
use std::sync::Arc;
use tracing::warn;
use turnstile_core::{CredentialMode, Session, XsrfConfig};

/// Attaches credentials to outgoing requests
pub trait CredentialStrategy: Send + Sync {
    fn mode(&self) -> CredentialMode;

    /// Add whatever the current session needs to `request`. A caller-supplied
    /// `Authorization` header is never replaced.
    fn attach(&self, request: &mut Request, session: &Session);

    /// Prepare the refresh exchange
    fn attach_refresh(&self, request: &mut Request, session: &Session) -> Result<(), RefreshError>;
}

/// Safe methods never change server state and skip the anti-forgery header
fn is_state_changing(method: &Method) -> bool {
    !(method == Method::GET
        || method == Method::HEAD
        || method == Method::OPTIONS
        || method == Method::TRACE)
}

fn bearer(token: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}")).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// Bearer tokens held by the session store
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenCredentials;

impl CredentialStrategy for TokenCredentials {
    fn mode(&self) -> CredentialMode {
        CredentialMode::Token
    }

    fn attach(&self, request: &mut Request, session: &Session) {
        if request.headers().contains_key(AUTHORIZATION) {
            return;
        }
        let Some(token) = session.bearer() else {
            return;
        };
        match bearer(token) {
            Some(value) => {
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            None => warn!("Access token is not a valid header value, sending without it"),
        }
    }

    fn attach_refresh(&self, request: &mut Request, session: &Session) -> Result<(), RefreshError> {
        let token = session
            .refresh_token
            .as_deref()
            .ok_or(RefreshError::NoRefreshCredential)?;
        let value = bearer(token).ok_or(RefreshError::NoRefreshCredential)?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// Transport-managed cookies plus an anti-forgery header
#[derive(Debug, Clone)]
pub struct CookieCredentials {
    jar: Arc<Jar>,
    cookie_name: String,
    header_name: HeaderName,
}

impl CookieCredentials {
    /// Build from the jar the transport was configured with
    pub fn new(jar: Arc<Jar>, xsrf: &XsrfConfig) -> Result<Self, reqwest::header::InvalidHeaderName> {
        Ok(Self {
            jar,
            cookie_name: xsrf.cookie_name.clone(),
            header_name: HeaderName::from_bytes(xsrf.header_name.as_bytes())?,
        })
    }

    /// Current value of the readable anti-forgery cookie for `url`
    pub fn xsrf_token(&self, url: &reqwest::Url) -> Option<String> {
        let cookies = self.jar.cookies(url)?;
        let cookies = cookies.to_str().ok()?;
        cookies
            .split(';')
            .filter_map(|cookie| cookie.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .and_then(|(_, value)| urlencoding::decode(value).ok())
            .map(|value| value.into_owned())
    }

    fn attach_xsrf(&self, request: &mut Request) {
        if !is_state_changing(request.method()) {
            return;
        }
        let Some(token) = self.xsrf_token(request.url()) else {
            return;
        };
        match HeaderValue::from_str(&token) {
            Ok(value) => {
                request.headers_mut().insert(self.header_name.clone(), value);
            }
            Err(_) => warn!(cookie = %self.cookie_name, "Anti-forgery cookie is not a valid header value"),
        }
    }
}

impl CredentialStrategy for CookieCredentials {
    fn mode(&self) -> CredentialMode {
        CredentialMode::Cookie
    }

    fn attach(&self, request: &mut Request, _session: &Session) {
        self.attach_xsrf(request);
    }

    fn attach_refresh(&self, request: &mut Request, _session: &Session) -> Result<(), RefreshError> {
        self.attach_xsrf(request);
        Ok(())
    }
}
