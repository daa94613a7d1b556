//! Identity provider seam.
//!
//! # Responsibilities
//! - Verify credentials and issue upstream sessions
//! - Report the session attached to a client's cookies
//! - Sign a session out
//!
//! # Design Decisions
//! - Calls are async; dropping the future cancels them, so host deadlines propagate
//! - `MemoryIdentityProvider` is a stand-in for a managed provider: configured accounts,
//!   opaque UUID handles kept in a concurrent map
//! - Sessions expire on the server after `session_ttl` from sign-in, whatever the
//!   client does with its cookie. Expired handles are reclaimed on lookup and swept on
//!   each sign-in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::clock::{has_elapsed, Clock, Millis};
use crate::error::ProviderError;
use crate::security::cookies::CookieStore;

/// Cookie carrying the provider's session handle.
pub const PROVIDER_SESSION_COOKIE: &str = "idp-session";

/// A session as the identity provider sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    pub subject_id: String,
    /// Opaque handle. Log only a truncated prefix.
    pub handle: String,
    /// When the provider authenticated the subject.
    pub issued_at: Millis,
}

/// Upstream identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Session bound to these cookies, if any.
    async fn session(&self, cookies: &dyn CookieStore) -> Result<Option<ProviderSession>, ProviderError>;

    /// Verify credentials and attach a new session to the cookies.
    async fn sign_in(
        &self,
        username: &str,
        password: &str,
        cookies: &mut dyn CookieStore,
    ) -> Result<ProviderSession, ProviderError>;

    /// End the session bound to these cookies. Signing out twice is not an error.
    async fn sign_out(&self, cookies: &mut dyn CookieStore) -> Result<(), ProviderError>;
}

struct IssuedSession {
    session: ProviderSession,
    expires_at: Millis,
}

/// In-process identity provider over a fixed account table.
pub struct MemoryIdentityProvider {
    users: HashMap<String, String>,
    sessions: DashMap<String, IssuedSession>,
    session_ttl: Duration,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl MemoryIdentityProvider {
    pub fn new(users: HashMap<String, String>, session_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            users,
            sessions: DashMap::new(),
            session_ttl,
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage. While unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Sessions held in the map, including expired ones not yet reclaimed.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every session past its lifetime. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, issued| !has_elapsed(now, issued.expires_at));
        before.saturating_sub(self.sessions.len())
    }

    fn ensure_available(&self) -> Result<(), ProviderError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::Unavailable("provider offline".to_string()))
        }
    }

    fn password_matches(&self, username: &str, password: &str) -> bool {
        // Unknown users still pay for a comparison.
        let expected = self.users.get(username).map(String::as_str).unwrap_or("");
        let equal: bool = expected.as_bytes().ct_eq(password.as_bytes()).into();
        equal && self.users.contains_key(username)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn session(&self, cookies: &dyn CookieStore) -> Result<Option<ProviderSession>, ProviderError> {
        self.ensure_available()?;
        let Some(handle) = cookies.get(PROVIDER_SESSION_COOKIE) else {
            return Ok(None);
        };
        let now = self.clock.now_ms();

        match self.sessions.get(&handle) {
            None => return Ok(None),
            Some(issued) if !has_elapsed(now, issued.expires_at) => {
                return Ok(Some(issued.session.clone()));
            }
            Some(_) => {}
        }
        self.sessions
            .remove_if(&handle, |_, issued| has_elapsed(now, issued.expires_at));
        tracing::debug!("Expired provider session reclaimed");
        Ok(None)
    }

    async fn sign_in(
        &self,
        username: &str,
        password: &str,
        cookies: &mut dyn CookieStore,
    ) -> Result<ProviderSession, ProviderError> {
        self.ensure_available()?;
        if !self.password_matches(username, password) {
            return Err(ProviderError::InvalidCredentials);
        }

        // Replace whatever session the client carried.
        if let Some(previous) = cookies.get(PROVIDER_SESSION_COOKIE) {
            self.sessions.remove(&previous);
        }
        self.purge_expired();

        let now = self.clock.now_ms();
        let session = ProviderSession {
            subject_id: username.to_string(),
            handle: Uuid::new_v4().simple().to_string(),
            issued_at: now,
        };
        cookies.set(PROVIDER_SESSION_COOKIE, &session.handle, self.session_ttl)?;
        let expires_at = now.saturating_add(self.session_ttl.as_millis() as Millis);
        self.sessions.insert(
            session.handle.clone(),
            IssuedSession {
                session: session.clone(),
                expires_at,
            },
        );
        tracing::debug!(subject = %session.subject_id, "Provider session issued");
        Ok(session)
    }

    async fn sign_out(&self, cookies: &mut dyn CookieStore) -> Result<(), ProviderError> {
        self.ensure_available()?;
        if let Some(handle) = cookies.get(PROVIDER_SESSION_COOKIE) {
            self.sessions.remove(&handle);
        }
        cookies.remove(PROVIDER_SESSION_COOKIE)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::security::cookies::MemoryCookieStore;

    fn provider_with_clock() -> (Arc<ManualClock>, MemoryIdentityProvider) {
        let clock = Arc::new(ManualClock::new(0));
        let mut users = HashMap::new();
        users.insert("alice".to_string(), "wonderland".to_string());
        let idp = MemoryIdentityProvider::new(users, Duration::from_secs(3600), clock.clone());
        (clock, idp)
    }

    fn provider() -> MemoryIdentityProvider {
        provider_with_clock().1
    }

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let idp = provider();
        let mut cookies = MemoryCookieStore::new(Arc::new(ManualClock::new(0)));

        let session = idp.sign_in("alice", "wonderland", &mut cookies).await.unwrap();
        assert_eq!(session.subject_id, "alice");
        assert_eq!(idp.session(&cookies).await.unwrap(), Some(session));

        idp.sign_out(&mut cookies).await.unwrap();
        assert_eq!(idp.session(&cookies).await.unwrap(), None);
        assert_eq!(idp.session_count(), 0);
        idp.sign_out(&mut cookies).await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let idp = provider();
        let mut cookies = MemoryCookieStore::new(Arc::new(ManualClock::new(0)));

        let wrong = idp.sign_in("alice", "nope", &mut cookies).await;
        assert!(matches!(wrong, Err(ProviderError::InvalidCredentials)));
        let unknown = idp.sign_in("mallory", "", &mut cookies).await;
        assert!(matches!(unknown, Err(ProviderError::InvalidCredentials)));
        assert!(cookies.is_empty());
    }

    #[tokio::test]
    async fn test_second_sign_in_replaces_session() {
        let idp = provider();
        let mut cookies = MemoryCookieStore::new(Arc::new(ManualClock::new(0)));
        let first = idp.sign_in("alice", "wonderland", &mut cookies).await.unwrap();
        let second = idp.sign_in("alice", "wonderland", &mut cookies).await.unwrap();

        assert_ne!(first.handle, second.handle);
        assert_eq!(idp.session_count(), 1);
    }

    #[tokio::test]
    async fn test_outage_is_an_error() {
        let idp = provider();
        let cookies = MemoryCookieStore::new(Arc::new(ManualClock::new(0)));
        idp.set_available(false);
        assert!(matches!(idp.session(&cookies).await, Err(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_session_expires_on_server_after_ttl() {
        let (clock, idp) = provider_with_clock();
        let mut cookies = MemoryCookieStore::new(clock.clone());
        idp.sign_in("alice", "wonderland", &mut cookies).await.unwrap();
        let handle = cookies.get(PROVIDER_SESSION_COOKIE).unwrap();

        // A client that keeps replaying the handle past its cookie lifetime.
        let mut replay = MemoryCookieStore::new(clock.clone());
        replay.insert_raw(PROVIDER_SESSION_COOKIE, &handle, Duration::from_secs(365 * 24 * 3600));

        clock.set(3_600_000);
        assert!(idp.session(&replay).await.unwrap().is_some());
        clock.set(3_600_001);
        assert_eq!(idp.session(&replay).await.unwrap(), None);
        assert_eq!(idp.session_count(), 0, "expired handle reclaimed on lookup");
    }

    #[tokio::test]
    async fn test_sign_in_sweeps_abandoned_sessions() {
        let (clock, idp) = provider_with_clock();
        for _ in 0..3 {
            let mut abandoned = MemoryCookieStore::new(clock.clone());
            idp.sign_in("alice", "wonderland", &mut abandoned).await.unwrap();
        }
        assert_eq!(idp.session_count(), 3);

        clock.set(2 * 3_600_000);
        let mut cookies = MemoryCookieStore::new(clock.clone());
        idp.sign_in("alice", "wonderland", &mut cookies).await.unwrap();
        assert_eq!(idp.session_count(), 1);
    }
}
