//! HTTP host for the guard.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, general rate limit)
//!     → handlers.rs (login, form, submit, session, logout)
//!     → security components via AppState
//!     → response with updated cookie jar
//! ```

pub mod handlers;
pub mod server;

pub use server::{shutdown_signal, AppState, HttpServer};
