//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the request guard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration for the reference HTTP host.
    pub listener: ListenerConfig,

    /// Rate limiter instances.
    pub rate_limit: RateLimitConfig,

    /// Anti-forgery token settings.
    pub csrf: CsrfConfig,

    /// Session expiry thresholds.
    pub session: SessionConfig,

    /// Attributes applied to every cookie the guard sets.
    pub cookies: CookieConfig,

    /// Built-in identity provider accounts.
    pub identity: IdentityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Both limiter instances plus shared map sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Guards credential checks.
    pub auth: RateLimitPolicy,

    /// Guards all traffic, looser.
    pub general: RateLimitPolicy,

    /// Soft cap on tracked identifiers per instance. Reaching it sweeps expired entries.
    pub max_entries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth: RateLimitPolicy::auth(),
            general: RateLimitPolicy::general(),
            max_entries: 100_000,
        }
    }
}

/// Limits for one rate limiter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitPolicy {
    /// Failures tolerated within one window before blocking.
    pub max_attempts: u32,

    /// Failure-counting window in milliseconds.
    pub window_ms: u64,

    /// Block length in milliseconds, counted from the failure that tripped it.
    pub block_ms: u64,
}

impl RateLimitPolicy {
    /// 5 attempts per 15 minutes, 30 minute block.
    pub fn auth() -> Self {
        Self {
            max_attempts: 5,
            window_ms: 15 * 60 * 1000,
            block_ms: 30 * 60 * 1000,
        }
    }

    /// 100 requests per minute, 5 minute block.
    pub fn general() -> Self {
        Self {
            max_attempts: 100,
            window_ms: 60 * 1000,
            block_ms: 5 * 60 * 1000,
        }
    }
}

/// Anti-forgery token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Lifetime of the per-client HMAC secret in seconds.
    pub secret_ttl_secs: u64,

    /// Lifetime of an issued token in seconds. Must be shorter than the secret's.
    pub token_ttl_secs: u64,

    /// Form field carrying the token on protected submissions.
    pub form_field: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secret_ttl_secs: 24 * 60 * 60,
            token_ttl_secs: 60 * 60,
            form_field: "csrf_token".to_string(),
        }
    }
}

/// Session expiry thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hard idle limit in seconds; exceeding it terminates the session.
    pub idle_timeout_secs: u64,

    /// Absolute lifetime in seconds, regardless of activity.
    pub absolute_timeout_secs: u64,

    /// Advisory timeout reported to clients, shorter than the idle limit.
    pub soft_timeout_secs: u64,

    /// How long before the soft timeout clients should warn.
    pub warning_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60 * 60,
            absolute_timeout_secs: 24 * 60 * 60,
            soft_timeout_secs: 30 * 60,
            warning_secs: 5 * 60,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout_secs * 1000
    }

    pub fn absolute_timeout_ms(&self) -> u64 {
        self.absolute_timeout_secs * 1000
    }

    pub fn soft_timeout_ms(&self) -> u64 {
        self.soft_timeout_secs * 1000
    }

    pub fn warning_ms(&self) -> u64 {
        self.warning_secs * 1000
    }
}

/// Cookie attributes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Set the `Secure` attribute. Enable in production.
    pub secure: bool,

    /// Cookie path.
    pub path: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: false,
            path: "/".to_string(),
        }
    }
}

/// Accounts known to the built-in identity provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Username to password.
    pub users: HashMap<String, String>,
}

/// Password of the account shipped in the default config.
pub const PLACEHOLDER_PASSWORD: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for IdentityConfig {
    fn default() -> Self {
        let mut users = HashMap::new();
        // WARNING: This is a placeholder! Change this in production.
        users.insert("demo".to_string(), PLACEHOLDER_PASSWORD.to_string());
        Self { users }
    }
}

impl IdentityConfig {
    /// Accounts still using the shipped placeholder password, sorted.
    pub fn placeholder_accounts(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .users
            .iter()
            .filter(|(_, password)| password.as_str() == PLACEHOLDER_PASSWORD)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the pretty format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Extra context keys to redact in security events, on top of the built-in list.
    pub redact_keys: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            redact_keys: Vec::new(),
        }
    }
}
