//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts > 0, durations > 0, addresses parse)
//! - Check cross-field ordering (token TTL below secret TTL, warning inside soft timeout)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{GuardConfig, RateLimitPolicy};

/// A single semantic problem, tagged with the offending field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a loaded config for semantic errors.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            "must be a socket address like 0.0.0.0:8080",
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    check_policy("rate_limit.auth", &config.rate_limit.auth, &mut errors);
    check_policy("rate_limit.general", &config.rate_limit.general, &mut errors);
    if config.rate_limit.max_entries == 0 {
        errors.push(ValidationError::new("rate_limit.max_entries", "must be > 0"));
    }

    let csrf = &config.csrf;
    if csrf.secret_ttl_secs == 0 {
        errors.push(ValidationError::new("csrf.secret_ttl_secs", "must be > 0"));
    }
    if csrf.token_ttl_secs == 0 || csrf.token_ttl_secs >= csrf.secret_ttl_secs {
        errors.push(ValidationError::new(
            "csrf.token_ttl_secs",
            "must be > 0 and shorter than csrf.secret_ttl_secs",
        ));
    }
    if csrf.form_field.trim().is_empty() {
        errors.push(ValidationError::new("csrf.form_field", "must not be empty"));
    }

    let session = &config.session;
    for (field, value) in [
        ("session.idle_timeout_secs", session.idle_timeout_secs),
        ("session.absolute_timeout_secs", session.absolute_timeout_secs),
        ("session.soft_timeout_secs", session.soft_timeout_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if session.warning_secs >= session.soft_timeout_secs {
        errors.push(ValidationError::new(
            "session.warning_secs",
            "must be shorter than session.soft_timeout_secs",
        ));
    }

    if config.identity.users.is_empty() {
        errors.push(ValidationError::new("identity.users", "at least one account is required"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address when metrics are enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_policy(prefix: &str, policy: &RateLimitPolicy, errors: &mut Vec<ValidationError>) {
    if policy.max_attempts == 0 {
        errors.push(ValidationError::new(format!("{prefix}.max_attempts"), "must be > 0"));
    }
    if policy.window_ms == 0 {
        errors.push(ValidationError::new(format!("{prefix}.window_ms"), "must be > 0"));
    }
    if policy.block_ms == 0 {
        errors.push(ValidationError::new(format!("{prefix}.block_ms"), "must be > 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GuardConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GuardConfig::default();
        config.rate_limit.auth.max_attempts = 0;
        config.rate_limit.general.block_ms = 0;
        config.session.warning_secs = config.session.soft_timeout_secs;
        config.listener.bind_address = "not-an-address".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"rate_limit.auth.max_attempts"));
        assert!(fields.contains(&"rate_limit.general.block_ms"));
        assert!(fields.contains(&"session.warning_secs"));
        assert!(fields.contains(&"listener.bind_address"));
    }

    #[test]
    fn test_empty_user_table_rejected() {
        let mut config = GuardConfig::default();
        config.identity.users.clear();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "identity.users");
    }
}
