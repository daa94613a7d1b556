//! Error types shared across the guard.

use thiserror::Error;

/// Failures reported by the identity provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not be reached or answered unexpectedly.
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),

    /// The provider rejected the supplied credentials.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The provider could not update the client's cookies.
    #[error("Provider cookie error: {0}")]
    Cookie(#[from] CookieError),
}

/// Failures writing to the per-request cookie store.
#[derive(Debug, Error)]
pub enum CookieError {
    /// Cookie name or value cannot be encoded.
    #[error("Invalid cookie {name}: {reason}")]
    Invalid { name: String, reason: String },

    /// The store refuses writes (e.g. response already sent).
    #[error("Cookie store is read-only")]
    ReadOnly,
}
