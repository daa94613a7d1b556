//! In-process request security: rate limiting, anti-forgery tokens and session expiry.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod observability;
pub mod security;

pub use config::schema::GuardConfig;
pub use http::HttpServer;
pub use security::{CsrfService, RateLimiter, SessionGuardian};
