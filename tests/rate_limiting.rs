//! Admission control through the reference host.

use reqwest::StatusCode;

mod common;

use common::{client, login, start_server, test_config, PASSWORD, USER};
use request_guard::config::RateLimitPolicy;

#[tokio::test]
async fn test_brute_force_blocks_before_credentials() {
    let server = start_server(test_config()).await;
    let client = client("192.0.2.20");

    for _ in 0..3 {
        let res = login(&client, &server, USER, "wrong").await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    // Correct credentials are not even checked while blocked.
    let res = login(&client, &server, USER, PASSWORD).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res
        .headers()
        .get("retry-after")
        .expect("Retry-After header")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 120);
    let body = res.text().await.unwrap();
    assert!(!body.contains('3'), "response must not leak attempt counts");
}

#[tokio::test]
async fn test_success_resets_failure_history() {
    let server = start_server(test_config()).await;
    let client = client("192.0.2.21");

    for _ in 0..2 {
        login(&client, &server, USER, "wrong").await;
    }
    assert_eq!(login(&client, &server, USER, PASSWORD).await.status(), StatusCode::OK);

    for _ in 0..2 {
        let res = login(&client, &server, USER, "wrong").await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
    assert_eq!(login(&client, &server, USER, PASSWORD).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_clients_are_limited_independently() {
    let server = start_server(test_config()).await;
    let attacker = client("192.0.2.22");
    let bystander = client("192.0.2.23");

    for _ in 0..3 {
        login(&attacker, &server, USER, "wrong").await;
    }
    assert_eq!(
        login(&attacker, &server, USER, PASSWORD).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(login(&bystander, &server, USER, PASSWORD).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_general_limiter_caps_all_traffic() {
    let mut config = test_config();
    config.rate_limit.general = RateLimitPolicy {
        max_attempts: 5,
        window_ms: 60_000,
        block_ms: 300_000,
    };
    let server = start_server(config).await;
    let client = client("192.0.2.24");

    for _ in 0..5 {
        let res = client.get(server.url("/health")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    let res = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn test_headerless_clients_share_unknown_bucket() {
    let mut config = test_config();
    config.rate_limit.general = RateLimitPolicy {
        max_attempts: 2,
        window_ms: 60_000,
        block_ms: 60_000,
    };
    let server = start_server(config).await;
    let first = reqwest::Client::builder().no_proxy().build().unwrap();
    let second = reqwest::Client::builder().no_proxy().build().unwrap();

    assert_eq!(first.get(server.url("/health")).send().await.unwrap().status(), StatusCode::OK);
    assert_eq!(second.get(server.url("/health")).send().await.unwrap().status(), StatusCode::OK);
    assert_eq!(
        first.get(server.url("/health")).send().await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
