//! Session lifecycle enforcement on top of the identity provider.
//!
//! # State Machine
//! ```text
//! NONE → ACTIVE: provider session observed, activity clocks initialized
//! ACTIVE → WARNING: advisory only, reported through timeout_info()
//! ACTIVE | WARNING → EXPIRED(idle | age): detected by validate()
//! EXPIRED → NONE: terminate() signs out upstream and clears local clocks
//! ```
//!
//! # Design Decisions
//! - Two cookie-backed clocks: `last-activity` (rolling, idle limit) and
//!   `session-created` (set once, absolute limit). They are independent of the
//!   provider's own session lifetime.
//! - `extend()` is the one call request handlers make; it either refreshes a valid
//!   session or terminates an invalid one
//! - Missing or unreadable clock cookies resolve toward expiry, except on the very
//!   first observation when neither exists
//! - The clocks are client-held and unsigned, so the absolute clock is clamped to the
//!   provider's sign-in time. Deleting or rewriting `session-created` cannot restart it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::clock::{has_elapsed, Clock, Millis};
use crate::config::SessionConfig;
use crate::error::{CookieError, ProviderError};
use crate::identity::IdentityProvider;
use crate::observability::logging::handle_prefix;
use crate::observability::{metrics, SecurityLogger};
use crate::security::cookies::{CookieStore, LAST_ACTIVITY_COOKIE, SESSION_CREATED_COOKIE};

/// A provider session joined with the locally tracked clocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub subject_id: String,
    pub session_handle: String,
    pub last_activity_at: Millis,
    pub created_at: Millis,
}

/// Why a session was ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// User asked to leave.
    Logout,
    /// No activity within the idle limit.
    Idle,
    /// Older than the absolute lifetime.
    Age,
    /// No provider session to begin with.
    NoSession,
    /// Provider or cookie store failure.
    Internal,
    /// Ended by another security control.
    SecurityEvent,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Logout => "logout",
            TerminationReason::Idle => "idle",
            TerminationReason::Age => "age",
            TerminationReason::NoSession => "no_session",
            TerminationReason::Internal => "internal",
            TerminationReason::SecurityEvent => "security_event",
        }
    }
}

/// Result of [`SessionGuardian::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionVerdict {
    Valid,
    Invalid(TerminationReason),
}

impl SessionVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, SessionVerdict::Valid)
    }
}

/// Client-side countdown data. Carries no authority over the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutInfo {
    pub time_until_warning_ms: u64,
    pub time_until_timeout_ms: u64,
    pub should_warn: bool,
    pub should_timeout: bool,
}

/// Decides whether a session continues, warns, or ends.
pub struct SessionGuardian {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    logger: SecurityLogger,
}

impl SessionGuardian {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        logger: SecurityLogger,
    ) -> Self {
        Self {
            provider,
            clock,
            config,
            logger,
        }
    }

    /// The current session, or `None` if there is none or the provider failed.
    pub async fn current_session(&self, cookies: &dyn CookieStore) -> Option<SessionRecord> {
        match self.lookup(cookies).await {
            Ok(record) => record,
            Err(e) => {
                self.log_provider_error("session lookup", &e);
                None
            }
        }
    }

    async fn lookup(&self, cookies: &dyn CookieStore) -> Result<Option<SessionRecord>, ProviderError> {
        let Some(session) = self.provider.session(cookies).await? else {
            return Ok(None);
        };
        let now = self.clock.now_ms();

        let created = cookies.get(SESSION_CREATED_COOKIE).map(|raw| parse_timestamp(&raw, now));
        let activity = cookies.get(LAST_ACTIVITY_COOKIE).map(|raw| parse_timestamp(&raw, now));

        // The absolute clock never starts later than the provider's sign-in.
        let issued_at = session.issued_at.min(now);
        let (created_at, last_activity_at) = match (created, activity) {
            (Some(created), Some(activity)) => (created.min(issued_at), activity),
            // Activity cookie lapsed: assume the oldest possible activity.
            (Some(created), None) => {
                let created = created.min(issued_at);
                (created, created)
            }
            // Creation cookie lapsed while activity continued: treat as past any lifetime.
            (None, Some(activity)) => (0, activity),
            // First observation. Activity starts now, age runs from sign-in.
            (None, None) => (issued_at, now),
        };

        Ok(Some(SessionRecord {
            subject_id: session.subject_id,
            session_handle: session.handle,
            last_activity_at,
            created_at,
        }))
    }

    /// Refresh the idle clock, and start the absolute clock if it is not running.
    pub fn touch(&self, cookies: &mut dyn CookieStore) -> Result<(), CookieError> {
        let now = self.clock.now_ms().to_string();
        cookies.set(
            LAST_ACTIVITY_COOKIE,
            &now,
            Duration::from_secs(self.config.idle_timeout_secs),
        )?;
        if cookies.get(SESSION_CREATED_COOKIE).is_none() {
            cookies.set(
                SESSION_CREATED_COOKIE,
                &now,
                Duration::from_secs(self.config.absolute_timeout_secs),
            )?;
        }
        Ok(())
    }

    /// Restart both clocks for a freshly authenticated session.
    pub fn start(&self, cookies: &mut dyn CookieStore) -> Result<(), CookieError> {
        cookies.remove(LAST_ACTIVITY_COOKIE)?;
        cookies.remove(SESSION_CREATED_COOKIE)?;
        self.touch(cookies)
    }

    /// Check both the idle and the absolute limit.
    pub async fn validate(&self, cookies: &dyn CookieStore) -> SessionVerdict {
        let record = match self.lookup(cookies).await {
            Ok(Some(record)) => record,
            Ok(None) => return SessionVerdict::Invalid(TerminationReason::NoSession),
            Err(e) => {
                self.log_provider_error("session lookup", &e);
                return SessionVerdict::Invalid(TerminationReason::Internal);
            }
        };
        let now = self.clock.now_ms();

        let idle_deadline = record.last_activity_at.saturating_add(self.config.idle_timeout_ms());
        let age_deadline = record.created_at.saturating_add(self.config.absolute_timeout_ms());

        if has_elapsed(now, idle_deadline) {
            SessionVerdict::Invalid(TerminationReason::Idle)
        } else if has_elapsed(now, age_deadline) {
            SessionVerdict::Invalid(TerminationReason::Age)
        } else {
            SessionVerdict::Valid
        }
    }

    /// End the session: log, sign out upstream, clear local clocks.
    ///
    /// Safe to call without a session; nothing is logged in that case.
    pub async fn terminate(&self, cookies: &mut dyn CookieStore, reason: TerminationReason) {
        match self.provider.session(&*cookies).await {
            Ok(Some(session)) => {
                self.logger.warn(
                    "Session terminated",
                    json!({
                        "reason": reason.as_str(),
                        "handle_prefix": handle_prefix(&session.handle),
                    }),
                    Some(&session.subject_id),
                );
                metrics::record_session_terminated(reason.as_str());
            }
            Ok(None) => {}
            Err(e) => self.log_provider_error("session lookup before sign-out", &e),
        }

        if let Err(e) = self.provider.sign_out(cookies).await {
            self.log_provider_error("sign-out", &e);
        }

        for name in [LAST_ACTIVITY_COOKIE, SESSION_CREATED_COOKIE] {
            if let Err(e) = cookies.remove(name) {
                self.logger.error(
                    "Failed to clear session cookie",
                    json!({ "name": name, "error": e.to_string() }),
                    None,
                );
            }
        }
    }

    /// Validate, then either touch (true) or terminate (false).
    pub async fn extend(&self, cookies: &mut dyn CookieStore) -> bool {
        match self.validate(&*cookies).await {
            SessionVerdict::Valid => match self.touch(cookies) {
                Ok(()) => true,
                Err(e) => {
                    self.logger.error(
                        "Failed to refresh session activity",
                        json!({ "error": e.to_string() }),
                        None,
                    );
                    self.terminate(cookies, TerminationReason::Internal).await;
                    false
                }
            },
            SessionVerdict::Invalid(reason) => {
                self.terminate(cookies, reason).await;
                false
            }
        }
    }

    /// Countdown to the advisory soft timeout.
    ///
    /// `should_warn` holds while the warning point has passed but the soft timeout has not.
    pub async fn timeout_info(&self, cookies: &dyn CookieStore) -> Option<TimeoutInfo> {
        let record = self.current_session(cookies).await?;
        let now = self.clock.now_ms();

        let timeout_at = record.last_activity_at.saturating_add(self.config.soft_timeout_ms());
        let warning_at = timeout_at.saturating_sub(self.config.warning_ms());
        let timed_out = has_elapsed(now, timeout_at);

        Some(TimeoutInfo {
            time_until_warning_ms: warning_at.saturating_sub(now),
            time_until_timeout_ms: timeout_at.saturating_sub(now),
            should_warn: has_elapsed(now, warning_at) && !timed_out,
            should_timeout: timed_out,
        })
    }

    fn log_provider_error(&self, operation: &str, error: &ProviderError) {
        self.logger.error(
            "Identity provider call failed",
            json!({ "operation": operation, "error": error.to_string() }),
            None,
        );
    }
}

/// Parse a clock cookie. Garbage and future instants read as the epoch so they expire.
fn parse_timestamp(raw: &str, now: Millis) -> Millis {
    match raw.trim().parse::<Millis>() {
        Ok(ts) if ts <= now => ts,
        _ => 0,
    }
}
