//! Anti-forgery tokens bound to a per-client secret.
//!
//! A client holds two cookies: a long-lived random secret and the most recently issued
//! token `nonce.signature`, where `signature = hex(HMAC-SHA256(secret, nonce))`.
//! A submitted token is accepted only if it equals the stored token AND its signature
//! verifies against the stored secret. The equality check rejects older tokens that
//! still carry a valid signature; the signature check rejects a forged token cookie.
//!
//! Validation fails closed: any missing piece, malformed input or decode error is a
//! rejection and is never propagated as an error.

use std::time::Duration;

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::CsrfConfig;
use crate::error::CookieError;
use crate::observability::{metrics, SecurityLogger};
use crate::security::cookies::{CookieStore, CSRF_SECRET_COOKIE, CSRF_TOKEN_COOKIE};

type HmacSha256 = Hmac<Sha256>;

/// Random bytes in a secret.
const SECRET_LEN: usize = 32;
/// Random bytes in a nonce.
const NONCE_LEN: usize = 32;
/// Separates nonce and signature.
const SEPARATOR: char = '.';

/// Issues and verifies anti-forgery tokens.
#[derive(Debug, Clone)]
pub struct CsrfService {
    config: CsrfConfig,
    logger: SecurityLogger,
}

impl CsrfService {
    pub fn new(config: CsrfConfig, logger: SecurityLogger) -> Self {
        Self { config, logger }
    }

    /// Form field carrying the token.
    pub fn form_field(&self) -> &str {
        &self.config.form_field
    }

    /// Issue a fresh token, creating the client's secret first if needed.
    ///
    /// The new token replaces any previously issued one.
    pub fn issue_token(&self, cookies: &mut dyn CookieStore) -> Result<String, CookieError> {
        let secret = match cookies.get(CSRF_SECRET_COOKIE).and_then(|s| decode_secret(&s)) {
            Some(secret) => secret,
            None => {
                let secret = random_bytes::<SECRET_LEN>().to_vec();
                cookies.set(
                    CSRF_SECRET_COOKIE,
                    &hex::encode(&secret),
                    Duration::from_secs(self.config.secret_ttl_secs),
                )?;
                secret
            }
        };

        let nonce = hex::encode(random_bytes::<NONCE_LEN>());
        let signature = sign(&secret, &nonce);
        let token = format!("{nonce}{SEPARATOR}{signature}");

        cookies.set(
            CSRF_TOKEN_COOKIE,
            &token,
            Duration::from_secs(self.config.token_ttl_secs),
        )?;
        Ok(token)
    }

    /// Whether `candidate` is the client's current, correctly signed token.
    pub fn validate_token(&self, cookies: &dyn CookieStore, candidate: Option<&str>) -> bool {
        match self.check(cookies, candidate) {
            Ok(()) => true,
            Err(reason) => {
                metrics::record_csrf_rejected(reason);
                self.logger
                    .warn("CSRF validation failed", json!({ "reason": reason }), None);
                false
            }
        }
    }

    fn check(&self, cookies: &dyn CookieStore, candidate: Option<&str>) -> Result<(), &'static str> {
        let candidate = candidate.filter(|c| !c.is_empty()).ok_or("missing_candidate")?;
        let stored = cookies
            .get(CSRF_TOKEN_COOKIE)
            .filter(|t| !t.is_empty())
            .ok_or("missing_token")?;
        let secret = cookies
            .get(CSRF_SECRET_COOKIE)
            .filter(|s| !s.is_empty())
            .ok_or("missing_secret")?;

        if !bool::from(candidate.as_bytes().ct_eq(stored.as_bytes())) {
            return Err("token_mismatch");
        }

        let (nonce, signature) = candidate.split_once(SEPARATOR).ok_or("malformed")?;
        if nonce.is_empty() || signature.is_empty() {
            return Err("malformed");
        }
        let secret = decode_secret(&secret).ok_or("bad_secret")?;
        let provided = hex::decode(signature).map_err(|_| "malformed")?;

        let mut mac = HmacSha256::new_from_slice(&secret).map_err(|_| "bad_secret")?;
        mac.update(nonce.as_bytes());
        // verify_slice compares in constant time.
        mac.verify_slice(&provided).map_err(|_| "bad_signature")
    }

    /// Remove both cookies, e.g. on logout.
    pub fn clear_tokens(&self, cookies: &mut dyn CookieStore) -> Result<(), CookieError> {
        cookies.remove(CSRF_TOKEN_COOKIE)?;
        cookies.remove(CSRF_SECRET_COOKIE)
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn decode_secret(encoded: &str) -> Option<Vec<u8>> {
    hex::decode(encoded).ok().filter(|s| s.len() == SECRET_LEN)
}

fn sign(secret: &[u8], nonce: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(nonce.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
