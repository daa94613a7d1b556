//! Shared utilities for integration testing.

use std::net::SocketAddr;

use reqwest::header::{HeaderMap, HeaderValue};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use request_guard::config::{GuardConfig, RateLimitPolicy};
use request_guard::HttpServer;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "wonderland";

/// A guard server on an ephemeral port; stops when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Defaults with one known account and a tight auth limiter.
pub fn test_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.identity.users.clear();
    config.identity.users.insert(USER.to_string(), PASSWORD.to_string());
    config.rate_limit.auth = RateLimitPolicy {
        max_attempts: 3,
        window_ms: 60_000,
        block_ms: 120_000,
    };
    config
}

/// Start a server for `config`. The listener is bound before this returns.
pub async fn start_server(config: GuardConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    let server = HttpServer::new(config);
    tokio::spawn(async move {
        let _ = server
            .run(listener, async {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        addr,
        shutdown: Some(tx),
    }
}

/// Client with its own cookie jar, presenting as `client_ip`.
pub fn client(client_ip: &'static str) -> reqwest::Client {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static(client_ip));
    reqwest::Client::builder()
        .cookie_store(true)
        .default_headers(headers)
        .no_proxy()
        .build()
        .unwrap()
}

pub async fn login(
    client: &reqwest::Client,
    server: &TestServer,
    username: &str,
    password: &str,
) -> reqwest::Response {
    client
        .post(server.url("/login"))
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .expect("Server unreachable")
}

/// Fetch a fresh anti-forgery token for a signed-in client.
#[allow(dead_code)]
pub async fn fetch_token(client: &reqwest::Client, server: &TestServer) -> String {
    let res = client.get(server.url("/form")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    body["csrf_token"].as_str().unwrap().to_string()
}
