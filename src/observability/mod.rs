//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Rate limiter, CSRF service, session guardian produce:
//!     → logging.rs (redacted security events, tracing init)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Security events pass through redaction before any sink sees them
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::{SecurityLevel, SecurityLogger, SecuritySink};
