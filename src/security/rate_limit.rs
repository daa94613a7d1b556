//! Failure-counting rate limiter with escalating blocks.
//!
//! # State Transitions (per identifier)
//! ```text
//! ABSENT → COUNTING: first failure, window clock starts
//! COUNTING → COUNTING: failure below threshold
//! COUNTING → BLOCKED: failure reaching threshold, block clock replaces window clock
//! COUNTING | BLOCKED → ABSENT: clock elapsed (lazy purge) or success
//! ```
//!
//! # Design Decisions
//! - One instance per concern (authentication, general traffic), each with its own policy
//! - Per-key atomicity through the sharded map's entry API; distinct keys never contend
//! - Expired entries are reclaimed on the next touch of the key, or swept when the soft
//!   cap is reached. There is no background task.
//! - Callers only learn allowed/denied and a retry-after value, never counts

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;

use crate::clock::{has_elapsed, Clock, Millis};
use crate::config::RateLimitPolicy;
use crate::observability::{metrics, SecurityLogger};
use crate::security::headers::{client_identifier, normalize_identifier};

/// Failure history for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Failures within the current window.
    pub count: u32,
    /// Window expiry, or block expiry once `blocked`.
    pub window_reset_at: Millis,
    pub blocked: bool,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after_secs: u64 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// In-memory rate limiter keyed by client identifier.
pub struct RateLimiter {
    scope: String,
    entries: DashMap<String, RateLimitEntry>,
    policy: RateLimitPolicy,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    logger: SecurityLogger,
}

impl RateLimiter {
    pub fn new(
        scope: impl Into<String>,
        policy: RateLimitPolicy,
        max_entries: usize,
        clock: Arc<dyn Clock>,
        logger: SecurityLogger,
    ) -> Self {
        Self {
            scope: scope.into(),
            entries: DashMap::new(),
            policy,
            max_entries: max_entries.max(1),
            clock,
            logger,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Number of tracked identifiers, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a first failure in a new window. True when that failure already
    /// reaches the threshold.
    fn fresh_entry(&self, now: Millis) -> (RateLimitEntry, bool) {
        let mut entry = RateLimitEntry {
            count: 0,
            window_reset_at: now.saturating_add(self.policy.window_ms),
            blocked: false,
        };
        let engaged = self.count_failure(&mut entry, now);
        (entry, engaged)
    }

    /// Whether `identifier` may attempt now. Purges the entry if its clock has elapsed.
    pub fn is_allowed(&self, identifier: &str) -> bool {
        let key = normalize_identifier(identifier);
        let now = self.clock.now_ms();

        match self.entries.entry(key.to_string()) {
            Entry::Vacant(_) => true,
            Entry::Occupied(entry) => {
                let current = *entry.get();
                if has_elapsed(now, current.window_reset_at) {
                    entry.remove();
                    true
                } else if current.blocked {
                    false
                } else {
                    current.count < self.policy.max_attempts
                }
            }
        }
    }

    /// Count a failure. Reaching the threshold starts (or re-arms) the block clock.
    pub fn record_failure(&self, identifier: &str) {
        let key = normalize_identifier(identifier);
        self.ensure_capacity(key);
        let now = self.clock.now_ms();

        let engaged = match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let (entry, engaged) = self.fresh_entry(now);
                vacant.insert(entry);
                engaged
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if has_elapsed(now, entry.window_reset_at) {
                    let (fresh, engaged) = self.fresh_entry(now);
                    *entry = fresh;
                    engaged
                } else {
                    self.count_failure(entry, now)
                }
            }
        };

        if engaged {
            self.log_block(key);
        }
    }

    /// Bump an unexpired entry. Returns true when this failure newly engages the block.
    fn count_failure(&self, entry: &mut RateLimitEntry, now: Millis) -> bool {
        entry.count = entry.count.saturating_add(1);
        if entry.count >= self.policy.max_attempts {
            let newly = !entry.blocked;
            entry.blocked = true;
            entry.window_reset_at = now.saturating_add(self.policy.block_ms);
            newly
        } else {
            false
        }
    }

    /// Forget all history for `identifier`.
    pub fn record_success(&self, identifier: &str) {
        let key = normalize_identifier(identifier);
        self.entries.remove(key);
    }

    /// Admission check plus retry-after for denied callers.
    pub fn check(&self, identifier: &str) -> Admission {
        if self.is_allowed(identifier) {
            Admission::Allowed
        } else {
            self.deny(identifier)
        }
    }

    /// Check and count one attempt atomically. Used where every request is an attempt.
    pub fn try_acquire(&self, identifier: &str) -> Admission {
        let key = normalize_identifier(identifier);
        self.ensure_capacity(key);
        let now = self.clock.now_ms();

        let (admission, engaged) = match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let (entry, engaged) = self.fresh_entry(now);
                vacant.insert(entry);
                (Admission::Allowed, engaged)
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if has_elapsed(now, entry.window_reset_at) {
                    let (fresh, engaged) = self.fresh_entry(now);
                    *entry = fresh;
                    (Admission::Allowed, engaged)
                } else if entry.blocked || entry.count >= self.policy.max_attempts {
                    (
                        Admission::Denied {
                            retry_after_secs: ceil_secs(entry.window_reset_at - now).max(1),
                        },
                        false,
                    )
                } else {
                    let engaged = self.count_failure(entry, now);
                    (Admission::Allowed, engaged)
                }
            }
        };

        if engaged {
            self.log_block(key);
        }
        if !admission.is_allowed() {
            metrics::record_rate_limited(&self.scope);
        }
        admission
    }

    fn deny(&self, identifier: &str) -> Admission {
        metrics::record_rate_limited(&self.scope);
        Admission::Denied {
            retry_after_secs: self.reset_seconds(identifier).max(1),
        }
    }

    /// Attempts left before a block. Advisory; never mutates state.
    pub fn remaining_attempts(&self, identifier: &str) -> u32 {
        let key = normalize_identifier(identifier);
        let now = self.clock.now_ms();
        match self.entries.get(key) {
            None => self.policy.max_attempts,
            Some(entry) if has_elapsed(now, entry.window_reset_at) => self.policy.max_attempts,
            Some(entry) if entry.blocked => 0,
            Some(entry) => self.policy.max_attempts.saturating_sub(entry.count),
        }
    }

    /// Whole seconds until the current window or block ends. Advisory; never mutates state.
    pub fn reset_seconds(&self, identifier: &str) -> u64 {
        let key = normalize_identifier(identifier);
        let now = self.clock.now_ms();
        match self.entries.get(key) {
            Some(entry) if !has_elapsed(now, entry.window_reset_at) => {
                ceil_secs(entry.window_reset_at - now)
            }
            _ => 0,
        }
    }

    /// Drop every entry whose clock has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !has_elapsed(now, entry.window_reset_at));
        before.saturating_sub(self.entries.len())
    }

    fn ensure_capacity(&self, key: &str) {
        if self.entries.len() < self.max_entries || self.entries.contains_key(key) {
            return;
        }
        let purged = self.purge_expired();
        if self.entries.len() >= self.max_entries {
            tracing::warn!(
                scope = %self.scope,
                entries = self.entries.len(),
                max_entries = self.max_entries,
                purged,
                "Rate limiter above soft cap after sweeping expired entries"
            );
        }
    }

    fn log_block(&self, key: &str) {
        self.logger.warn(
            "Rate limit block engaged",
            json!({
                "scope": self.scope,
                "identifier": key,
                "max_attempts": self.policy.max_attempts,
                "block_secs": ceil_secs(self.policy.block_ms),
            }),
            None,
        );
    }
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

/// 429 with a generic message and `Retry-After`.
pub fn rate_limited_response(retry_after_secs: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        "Too many requests. Please try again later.",
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

/// Middleware applying the general-traffic limiter to every request.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_identifier(request.headers());

    match limiter.try_acquire(&client) {
        Admission::Allowed => next.run(request).await,
        Admission::Denied { retry_after_secs } => {
            tracing::warn!(client = %client, scope = %limiter.scope(), "Rate limit exceeded");
            rate_limited_response(retry_after_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::observability::logging::MemorySink;

    fn limiter(max_attempts: u32, window_ms: u64, block_ms: u64) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(0));
        let policy = RateLimitPolicy {
            max_attempts,
            window_ms,
            block_ms,
        };
        let limiter = RateLimiter::new(
            "test",
            policy,
            1_000,
            clock.clone(),
            SecurityLogger::new(Arc::new(MemorySink::new()), &[]),
        );
        (clock, limiter)
    }

    #[test]
    fn test_block_runs_from_last_failure() {
        let (clock, limiter) = limiter(3, 1_000, 2_000);
        for t in [0, 100, 200] {
            clock.set(t);
            limiter.record_failure("x");
        }

        clock.set(201);
        assert!(!limiter.is_allowed("x"));
        clock.set(1_500);
        assert!(!limiter.is_allowed("x"), "block outlives the original window");
        clock.set(2_199);
        assert!(!limiter.is_allowed("x"));
        clock.set(2_200);
        assert!(!limiter.is_allowed("x"), "deadline instant is still inside the block");
        clock.set(2_201);
        assert!(limiter.is_allowed("x"));
        assert!(limiter.is_empty(), "elapsed entry purged on read");
    }

    #[test]
    fn test_counting_below_threshold_allows() {
        let (_clock, limiter) = limiter(5, 1_000, 2_000);
        for _ in 0..4 {
            limiter.record_failure("a");
        }
        assert!(limiter.is_allowed("a"));
        assert_eq!(limiter.remaining_attempts("a"), 1);
        limiter.record_failure("a");
        assert!(!limiter.is_allowed("a"));
        assert_eq!(limiter.remaining_attempts("a"), 0);
    }

    #[test]
    fn test_window_expiry_restarts_count() {
        let (clock, limiter) = limiter(3, 1_000, 5_000);
        limiter.record_failure("a");
        limiter.record_failure("a");
        clock.set(1_001);
        limiter.record_failure("a");
        assert!(limiter.is_allowed("a"));
        assert_eq!(limiter.remaining_attempts("a"), 2);
    }

    #[test]
    fn test_success_clears_history() {
        let (_clock, limiter) = limiter(3, 1_000, 2_000);
        for _ in 0..3 {
            limiter.record_failure("a");
        }
        assert!(!limiter.is_allowed("a"));
        limiter.record_success("a");
        assert!(limiter.is_allowed("a"));
        assert_eq!(limiter.remaining_attempts("a"), 3);
        assert_eq!(limiter.reset_seconds("a"), 0);
    }

    #[test]
    fn test_failures_while_blocked_rearm_block() {
        let (clock, limiter) = limiter(2, 1_000, 2_000);
        limiter.record_failure("a");
        limiter.record_failure("a");
        clock.set(1_500);
        limiter.record_failure("a");
        clock.set(2_500);
        assert!(!limiter.is_allowed("a"));
        clock.set(3_501);
        assert!(limiter.is_allowed("a"));
    }

    #[test]
    fn test_advisory_reads_do_not_mutate() {
        let (clock, limiter) = limiter(3, 1_000, 2_000);
        limiter.record_failure("a");
        clock.set(5_000);
        assert_eq!(limiter.remaining_attempts("a"), 3);
        assert_eq!(limiter.reset_seconds("a"), 0);
        assert_eq!(limiter.len(), 1, "advisory reads leave expired entries in place");
    }

    #[test]
    fn test_reset_seconds_rounds_up() {
        let (clock, limiter) = limiter(3, 1_000, 2_000);
        limiter.record_failure("a");
        clock.set(1);
        assert_eq!(limiter.reset_seconds("a"), 1);
        for _ in 0..2 {
            limiter.record_failure("a");
        }
        assert_eq!(limiter.reset_seconds("a"), 2);
        assert_eq!(limiter.check("a"), Admission::Denied { retry_after_secs: 2 });
    }

    #[test]
    fn test_empty_identifier_shares_unknown_bucket() {
        let (_clock, limiter) = limiter(2, 1_000, 2_000);
        limiter.record_failure("");
        limiter.record_failure("   ");
        assert!(!limiter.is_allowed("unknown"));
        assert!(!limiter.is_allowed(""));
        assert!(limiter.is_allowed("10.0.0.1"));
    }

    #[test]
    fn test_try_acquire_counts_each_request() {
        let (clock, limiter) = limiter(3, 1_000, 5_000);
        for _ in 0..3 {
            assert_eq!(limiter.try_acquire("a"), Admission::Allowed);
        }
        assert_eq!(limiter.try_acquire("a"), Admission::Denied { retry_after_secs: 5 });
        clock.set(5_001);
        assert_eq!(limiter.try_acquire("a"), Admission::Allowed);
    }

    #[test]
    fn test_block_engagement_is_logged_once() {
        let clock = Arc::new(ManualClock::new(0));
        let sink = Arc::new(MemorySink::new());
        let limiter = RateLimiter::new(
            "auth",
            RateLimitPolicy { max_attempts: 2, window_ms: 1_000, block_ms: 2_000 },
            10,
            clock,
            SecurityLogger::new(sink.clone(), &[]),
        );
        for _ in 0..4 {
            limiter.record_failure("203.0.113.7");
        }
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].context["scope"], "auth");
        assert_eq!(events[0].context["identifier"], "203.0.113.7");
    }

    #[test]
    fn test_soft_cap_sweeps_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::new(
            "test",
            RateLimitPolicy { max_attempts: 5, window_ms: 100, block_ms: 100 },
            2,
            clock.clone(),
            SecurityLogger::new(Arc::new(MemorySink::new()), &[]),
        );
        limiter.record_failure("a");
        limiter.record_failure("b");
        clock.set(500);
        limiter.record_failure("c");
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.remaining_attempts("c"), 4);
    }

    #[test]
    fn test_concurrent_failures_are_all_counted() {
        let (_clock, limiter) = limiter(1_000, 60_000, 60_000);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        limiter.record_failure("shared");
                    }
                });
            }
        });
        assert_eq!(limiter.remaining_attempts("shared"), 200);
    }

    #[test]
    fn test_single_attempt_policy_blocks_on_first_failure() {
        let clock = Arc::new(ManualClock::new(0));
        let sink = Arc::new(MemorySink::new());
        let limiter = RateLimiter::new(
            "auth",
            RateLimitPolicy { max_attempts: 1, window_ms: 1_000, block_ms: 5_000 },
            10,
            clock.clone(),
            SecurityLogger::new(sink.clone(), &[]),
        );
        limiter.record_failure("a");

        clock.set(1_001);
        assert!(!limiter.is_allowed("a"), "block clock applies, not the window");
        clock.set(5_000);
        assert!(!limiter.is_allowed("a"));
        clock.set(5_001);
        assert!(limiter.is_allowed("a"));
        assert_eq!(sink.events().len(), 1);

        // Same after a previous entry has lapsed.
        limiter.record_failure("a");
        assert_eq!(limiter.remaining_attempts("a"), 0);
        assert_eq!(limiter.reset_seconds("a"), 5);
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn test_single_attempt_policy_try_acquire() {
        let (clock, limiter) = limiter(1, 1_000, 5_000);
        assert_eq!(limiter.try_acquire("a"), Admission::Allowed);
        clock.set(1_001);
        assert_eq!(limiter.try_acquire("a"), Admission::Denied { retry_after_secs: 4 });
        clock.set(5_001);
        assert_eq!(limiter.try_acquire("a"), Admission::Allowed);
        assert_eq!(limiter.try_acquire("a"), Admission::Denied { retry_after_secs: 5 });
    }

    #[test]
    fn test_purge_expired_reports_removed() {
        let (clock, limiter) = limiter(3, 1_000, 2_000);
        limiter.record_failure("a");
        clock.set(500);
        limiter.record_failure("b");

        clock.set(1_001);
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.remaining_attempts("b"), 2);
    }
}
