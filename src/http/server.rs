//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Construct the guard components once from config and share them via `AppState`
//! - Create Axum Router with all handlers
//! - Wire up middleware (general rate limit, timeout, request ID, tracing)
//! - Serve until the shutdown future resolves

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::clock::{Clock, SystemClock};
use crate::config::{CookieConfig, GuardConfig};
use crate::http::handlers;
use crate::identity::{IdentityProvider, MemoryIdentityProvider};
use crate::observability::SecurityLogger;
use crate::security::rate_limit::rate_limit_middleware;
use crate::security::{CsrfService, JarCookies, RateLimiter, SessionGuardian};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth_limiter: Arc<RateLimiter>,
    pub general_limiter: Arc<RateLimiter>,
    pub csrf: Arc<CsrfService>,
    pub sessions: Arc<SessionGuardian>,
    pub provider: Arc<dyn IdentityProvider>,
    pub logger: SecurityLogger,
    pub cookie_config: CookieConfig,
}

impl AppState {
    /// Build every component from config around the given collaborators.
    pub fn from_config(
        config: &GuardConfig,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn IdentityProvider>,
        logger: SecurityLogger,
    ) -> Self {
        let limits = &config.rate_limit;
        let auth_limiter = Arc::new(RateLimiter::new(
            "auth",
            limits.auth,
            limits.max_entries,
            clock.clone(),
            logger.clone(),
        ));
        let general_limiter = Arc::new(RateLimiter::new(
            "general",
            limits.general,
            limits.max_entries,
            clock.clone(),
            logger.clone(),
        ));
        let csrf = Arc::new(CsrfService::new(config.csrf.clone(), logger.clone()));
        let sessions = Arc::new(SessionGuardian::new(
            provider.clone(),
            clock,
            config.session.clone(),
            logger.clone(),
        ));

        Self {
            auth_limiter,
            general_limiter,
            csrf,
            sessions,
            provider,
            logger,
            cookie_config: config.cookies.clone(),
        }
    }

    /// Cookie store over this request's jar.
    pub fn cookies(&self, jar: CookieJar) -> JarCookies {
        JarCookies::new(jar, self.cookie_config.clone())
    }
}

/// HTTP server hosting the guarded endpoints.
pub struct HttpServer {
    router: Router,
    config: GuardConfig,
    state: AppState,
}

impl HttpServer {
    /// Server with the system clock, the built-in identity provider and tracing output.
    pub fn new(config: GuardConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        // Provider sessions must outlive the absolute limit for age expiry to be seen.
        let provider_ttl = config
            .session
            .absolute_timeout_secs
            .saturating_add(config.session.idle_timeout_secs);
        let provider = Arc::new(MemoryIdentityProvider::new(
            config.identity.users.clone(),
            Duration::from_secs(provider_ttl),
            clock.clone(),
        ));
        let logger = SecurityLogger::tracing(&config.observability.redact_keys);
        let state = AppState::from_config(&config, clock, provider, logger);
        Self::with_state(config, state)
    }

    /// Server over pre-built state.
    pub fn with_state(config: GuardConfig, state: AppState) -> Self {
        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            config,
            state,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GuardConfig, state: AppState) -> Router {
        let general_limiter = state.general_limiter.clone();
        Router::new()
            .route("/health", get(handlers::health))
            .route("/login", post(handlers::login))
            .route("/form", get(handlers::form))
            .route("/submit", post(handlers::submit))
            .route("/session", get(handlers::session_status))
            .route("/logout", post(handlers::logout))
            .with_state(state)
            .layer(middleware::from_fn_with_state(
                general_limiter,
                rate_limit_middleware,
            ))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        config.listener.request_timeout_secs,
                    ))),
            )
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            auth_max_attempts = self.state.auth_limiter.policy().max_attempts,
            general_max_attempts = self.state.general_limiter.policy().max_attempts,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Shared component state.
    pub fn state(&self) -> &AppState {
        &self.state
    }
}

/// Wait for Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
