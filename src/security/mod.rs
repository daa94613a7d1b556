//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (derive client identifier)
//!     → rate_limit.rs (general traffic; auth attempts on credential endpoints)
//!     → session.rs (extend or terminate the caller's session)
//!     → csrf.rs (verify token on state-changing submissions)
//!     → Pass to handler
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure or ambiguity
//! - No trust in client input; cookie-held state is re-verified on every request

pub mod cookies;
pub mod csrf;
pub mod headers;
pub mod rate_limit;
pub mod session;

pub use cookies::{CookieStore, JarCookies, MemoryCookieStore};
pub use csrf::CsrfService;
pub use headers::client_identifier;
pub use rate_limit::{Admission, RateLimitEntry, RateLimiter};
pub use session::{SessionGuardian, SessionRecord, SessionVerdict, TerminationReason, TimeoutInfo};
