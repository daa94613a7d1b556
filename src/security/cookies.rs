//! Per-request cookie storage.
//!
//! # Responsibilities
//! - Abstract get/set/remove with expiry over whatever the host framework provides
//! - Apply the guard's cookie attributes (HttpOnly, SameSite=Strict, Secure) uniformly
//!
//! # Design Decisions
//! - CSRF and session state live only in cookies; the store is scoped to one request
//! - `JarCookies` adapts axum-extra's immutable `CookieJar` so handlers can hand the
//!   updated jar back in the response
//! - `MemoryCookieStore` honours TTLs against a [`Clock`] the way a browser would

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::clock::{has_elapsed, Clock, Millis};
use crate::config::CookieConfig;
use crate::error::CookieError;

/// HMAC key material.
pub const CSRF_SECRET_COOKIE: &str = "csrf-secret";
/// Current issued anti-forgery token.
pub const CSRF_TOKEN_COOKIE: &str = "csrf-token";
/// Idle-timeout clock.
pub const LAST_ACTIVITY_COOKIE: &str = "last-activity";
/// Absolute-timeout clock.
pub const SESSION_CREATED_COOKIE: &str = "session-created";

/// Cookie access for a single client.
pub trait CookieStore: Send + Sync {
    /// Current value, if present and unexpired.
    fn get(&self, name: &str) -> Option<String>;

    /// Store `value` for `max_age`.
    fn set(&mut self, name: &str, value: &str, max_age: Duration) -> Result<(), CookieError>;

    /// Delete the cookie. Deleting an absent cookie is not an error.
    fn remove(&mut self, name: &str) -> Result<(), CookieError>;
}

fn check_value(name: &str, value: &str) -> Result<(), CookieError> {
    let bad = value
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, ';' | ',' | '"' | '\\'));
    if name.is_empty() || bad {
        return Err(CookieError::Invalid {
            name: name.to_string(),
            reason: "value contains characters not allowed in a cookie".to_string(),
        });
    }
    Ok(())
}

/// [`CookieStore`] over an axum-extra [`CookieJar`].
#[derive(Debug, Clone)]
pub struct JarCookies {
    jar: CookieJar,
    config: CookieConfig,
}

impl JarCookies {
    pub fn new(jar: CookieJar, config: CookieConfig) -> Self {
        Self { jar, config }
    }

    /// Jar carrying every change made through this store, ready to return from a handler.
    pub fn into_jar(self) -> CookieJar {
        self.jar
    }
}

impl CookieStore for JarCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.jar.get(name).map(|c| c.value().to_string())
    }

    fn set(&mut self, name: &str, value: &str, max_age: Duration) -> Result<(), CookieError> {
        check_value(name, value)?;
        let cookie = Cookie::build((name.to_string(), value.to_string()))
            .http_only(true)
            .secure(self.config.secure)
            .same_site(SameSite::Strict)
            .path(self.config.path.clone())
            .max_age(time::Duration::seconds(max_age.as_secs() as i64));
        self.jar = std::mem::take(&mut self.jar).add(cookie);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), CookieError> {
        let cookie = Cookie::build((name.to_string(), String::new())).path(self.config.path.clone());
        self.jar = std::mem::take(&mut self.jar).remove(cookie);
        Ok(())
    }
}

/// In-process cookie jar with browser-like expiry.
pub struct MemoryCookieStore {
    clock: Arc<dyn Clock>,
    cookies: HashMap<String, (String, Millis)>,
    read_only: bool,
}

impl MemoryCookieStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cookies: HashMap::new(),
            read_only: false,
        }
    }

    /// A store whose writes always fail, for exercising internal-error paths.
    pub fn read_only(clock: Arc<dyn Clock>) -> Self {
        Self {
            read_only: true,
            ..Self::new(clock)
        }
    }

    /// Write a raw value with no validation, as a tampering client could.
    pub fn insert_raw(&mut self, name: &str, value: &str, max_age: Duration) {
        let expires_at = self.clock.now_ms() + max_age.as_millis() as Millis;
        self.cookies.insert(name.to_string(), (value.to_string(), expires_at));
    }

    /// Number of unexpired cookies.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.cookies
            .values()
            .filter(|(_, expires_at)| !has_elapsed(now, *expires_at))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CookieStore for MemoryCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        let now = self.clock.now_ms();
        self.cookies
            .get(name)
            .filter(|(_, expires_at)| !has_elapsed(now, *expires_at))
            .map(|(value, _)| value.clone())
    }

    fn set(&mut self, name: &str, value: &str, max_age: Duration) -> Result<(), CookieError> {
        if self.read_only {
            return Err(CookieError::ReadOnly);
        }
        check_value(name, value)?;
        self.insert_raw(name, value, max_age);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), CookieError> {
        if self.read_only {
            return Err(CookieError::ReadOnly);
        }
        self.cookies.remove(name);
        Ok(())
    }
}
