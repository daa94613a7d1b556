//! Request Guard (v1)
//!
//! Reference host for the request-security subsystem.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────────┐
//!                      │                  REQUEST GUARD                    │
//!                      │                                                   │
//!   Client Request     │  ┌──────────┐   ┌──────────────┐   ┌───────────┐ │
//!   ───────────────────┼─▶│ general  │──▶│ auth limiter │──▶│ identity  │ │
//!                      │  │ limiter  │   │  (/login)    │   │ provider  │ │
//!                      │  └──────────┘   └──────────────┘   └─────┬─────┘ │
//!                      │                                          │       │
//!                      │  ┌──────────┐   ┌──────────────┐         ▼       │
//!   Client Response    │  │  cookie  │◀──│    CSRF      │◀──┌───────────┐ │
//!   ◀──────────────────┼──│   jar    │   │   service    │   │  session  │ │
//!                      │  └──────────┘   └──────────────┘   │ guardian  │ │
//!                      │                                    └───────────┘ │
//!                      │  ┌──────────────────────────────────────────────┐ │
//!                      │  │ config · clock · security logger · metrics  │ │
//!                      │  └──────────────────────────────────────────────┘ │
//!                      └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use request_guard::config::resolve_config;
use request_guard::http::{shutdown_signal, HttpServer};
use request_guard::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "request-guard")]
#[command(about = "Rate limiting, CSRF and session expiry for web requests", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = resolve_config(cli.config.as_deref(), cli.bind)?;

    logging::init_tracing(&config.observability);
    tracing::info!("request-guard v0.1.0 starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        auth_max_attempts = config.rate_limit.auth.max_attempts,
        idle_timeout_secs = config.session.idle_timeout_secs,
        secure_cookies = config.cookies.secure,
        "Configuration loaded"
    );
    if !config.cookies.secure {
        tracing::warn!("Cookies are not marked Secure; enable cookies.secure in production");
    }
    for account in config.identity.placeholder_accounts() {
        tracing::warn!(account = %account, "Account uses the placeholder password; change it before production");
    }

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config);
    server.run(listener, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
