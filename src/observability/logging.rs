//! Structured logging and the security event logger.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Record security events from the rate limiter, CSRF service and session guardian
//! - Redact sensitive context fields before any event leaves the process
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Redaction is a case-insensitive substring match against a key deny-list.
//!   It is a heuristic: a secret stored under an unanticipated key name is not caught.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Key fragments that mark a context field as sensitive.
pub const DEFAULT_REDACTED_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "csrf",
    "cookie",
    "authorization",
    "session_handle",
    "api_key",
    "apikey",
    "credential",
    "private",
];

/// Replacement for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Initialize the global tracing subscriber.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("request_guard={0},security={0},tower_http=info", config.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::Info => f.write_str("info"),
            SecurityLevel::Warn => f.write_str("warn"),
            SecurityLevel::Error => f.write_str("error"),
        }
    }
}

/// Destination for already-redacted security events.
pub trait SecuritySink: Send + Sync {
    fn record(&self, level: SecurityLevel, message: &str, context: &Value, subject_id: Option<&str>);
}

/// Emits security events as `tracing` events under the `security` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl SecuritySink for TracingSink {
    fn record(&self, level: SecurityLevel, message: &str, context: &Value, subject_id: Option<&str>) {
        let subject = subject_id.unwrap_or("-");
        match level {
            SecurityLevel::Info => {
                tracing::info!(target: "security", subject = %subject, context = %context, "{}", message)
            }
            SecurityLevel::Warn => {
                tracing::warn!(target: "security", subject = %subject, context = %context, "{}", message)
            }
            SecurityLevel::Error => {
                tracing::error!(target: "security", subject = %subject, context = %context, "{}", message)
            }
        }
    }
}

/// A captured security event.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityEvent {
    pub level: SecurityLevel,
    pub message: String,
    pub context: Value,
    pub subject_id: Option<String>,
}

/// Keeps events in memory. Useful for tests and audit endpoints.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl SecuritySink for MemorySink {
    fn record(&self, level: SecurityLevel, message: &str, context: &Value, subject_id: Option<&str>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(SecurityEvent {
                level,
                message: message.to_string(),
                context: context.clone(),
                subject_id: subject_id.map(str::to_string),
            });
        }
    }
}

/// Redacting front for a [`SecuritySink`].
#[derive(Clone)]
pub struct SecurityLogger {
    sink: Arc<dyn SecuritySink>,
    deny_list: Arc<[String]>,
}

impl SecurityLogger {
    /// Build a logger over `sink`, redacting the default keys plus `extra_keys`.
    pub fn new(sink: Arc<dyn SecuritySink>, extra_keys: &[String]) -> Self {
        let deny_list: Vec<String> = DEFAULT_REDACTED_KEYS
            .iter()
            .map(|k| k.to_string())
            .chain(extra_keys.iter().map(|k| k.to_ascii_lowercase()))
            .collect();
        Self {
            sink,
            deny_list: deny_list.into(),
        }
    }

    /// Logger that writes through `tracing`.
    pub fn tracing(extra_keys: &[String]) -> Self {
        Self::new(Arc::new(TracingSink), extra_keys)
    }

    /// Redact `context` and hand the event to the sink.
    pub fn record(&self, level: SecurityLevel, message: &str, context: Value, subject_id: Option<&str>) {
        let context = self.redact(context);
        self.sink.record(level, message, &context, subject_id);
    }

    pub fn info(&self, message: &str, context: Value, subject_id: Option<&str>) {
        self.record(SecurityLevel::Info, message, context, subject_id);
    }

    pub fn warn(&self, message: &str, context: Value, subject_id: Option<&str>) {
        self.record(SecurityLevel::Warn, message, context, subject_id);
    }

    pub fn error(&self, message: &str, context: Value, subject_id: Option<&str>) {
        self.record(SecurityLevel::Error, message, context, subject_id);
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.deny_list.iter().any(|fragment| key.contains(fragment.as_str()))
    }

    fn redact(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let redacted: Map<String, Value> = map
                    .into_iter()
                    .map(|(key, value)| {
                        if self.is_sensitive(&key) {
                            (key, Value::String(REDACTED.to_string()))
                        } else {
                            let value = self.redact(value);
                            (key, value)
                        }
                    })
                    .collect();
                Value::Object(redacted)
            }
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.redact(v)).collect()),
            other => other,
        }
    }
}

impl fmt::Debug for SecurityLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityLogger")
            .field("deny_list", &self.deny_list)
            .finish_non_exhaustive()
    }
}

/// First eight characters of a session handle, for log correlation.
pub fn handle_prefix(handle: &str) -> String {
    let prefix: String = handle.chars().take(8).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capture(extra: &[String]) -> (Arc<MemorySink>, SecurityLogger) {
        let sink = Arc::new(MemorySink::new());
        let logger = SecurityLogger::new(sink.clone(), extra);
        (sink, logger)
    }

    #[test]
    fn test_sensitive_keys_redacted_case_insensitively() {
        let (sink, logger) = capture(&[]);
        logger.warn(
            "Login failed",
            json!({ "Password": "hunter2", "CSRF-Token": "abc.def", "ip": "10.0.0.1" }),
            Some("alice"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let ctx = &events[0].context;
        assert_eq!(ctx["Password"], REDACTED);
        assert_eq!(ctx["CSRF-Token"], REDACTED);
        assert_eq!(ctx["ip"], "10.0.0.1");
        assert_eq!(events[0].subject_id.as_deref(), Some("alice"));
        assert_eq!(events[0].level, SecurityLevel::Warn);
    }

    #[test]
    fn test_nested_values_redacted() {
        let (sink, logger) = capture(&[]);
        logger.info(
            "Nested",
            json!({ "request": { "headers": { "authorization": "Bearer x" }, "items": [{ "api_key": "k" }] } }),
            None,
        );

        let ctx = &sink.events()[0].context;
        assert_eq!(ctx["request"]["headers"]["authorization"], REDACTED);
        assert_eq!(ctx["request"]["items"][0]["api_key"], REDACTED);
    }

    #[test]
    fn test_extra_keys_extend_deny_list() {
        let (sink, logger) = capture(&["SSN".to_string()]);
        logger.error("Internal", json!({ "user_ssn": "123", "reason": "idle" }), None);

        let ctx = &sink.events()[0].context;
        assert_eq!(ctx["user_ssn"], REDACTED);
        assert_eq!(ctx["reason"], "idle");
    }

    #[test]
    fn test_handle_prefix_truncates() {
        assert_eq!(handle_prefix("0123456789abcdef"), "01234567...");
        assert_eq!(handle_prefix("abc"), "abc...");
    }
}
