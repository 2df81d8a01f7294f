//! End-to-end selection scenarios driven by real health probes.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use loadgate::health::{HealthCheckSettings, HealthChecker};
use loadgate::load_balancer::{LoadBalancer, RequestMeta, Strategy};
use wiremock::MockServer;

mod common;

fn settings() -> HealthCheckSettings {
    HealthCheckSettings {
        interval: Duration::from_secs(60),
        timeout: Duration::from_secs(1),
        path: "/health".to_string(),
    }
}

async fn three_backends() -> (Vec<MockServer>, Vec<String>) {
    let mut servers = Vec::new();
    for _ in 0..3 {
        servers.push(common::start_backend(200).await);
    }
    let addresses = servers.iter().map(|s| s.uri()).collect();
    (servers, addresses)
}

async fn one_tick(lb: &Arc<dyn LoadBalancer>) {
    let checker = HealthChecker::new(lb.clone(), settings()).unwrap();
    checker.check_all().await;
}

#[tokio::test]
async fn test_nothing_selectable_before_first_health_check() {
    let (_servers, addresses) = three_backends().await;
    let headers = HeaderMap::new();
    let meta = RequestMeta::new(&headers, Some("127.0.0.1:40000".parse().unwrap()));

    for strategy in [Strategy::RoundRobin, Strategy::LeastConnections, Strategy::IpHash] {
        let lb = common::balancer_with(strategy, &addresses).await;
        assert!(lb.select_backend(&meta).await.is_none(), "{strategy}");
    }
}

#[tokio::test]
async fn test_round_robin_after_one_tick() {
    let (_servers, addresses) = three_backends().await;
    let lb = common::balancer_with(Strategy::RoundRobin, &addresses).await;
    one_tick(&lb).await;

    let headers = HeaderMap::new();
    let meta = RequestMeta::new(&headers, None);

    assert_eq!(lb.select_backend(&meta).await.unwrap().address(), addresses[0]);
    assert_eq!(lb.select_backend(&meta).await.unwrap().address(), addresses[1]);
}

#[tokio::test]
async fn test_least_connections_after_one_tick() {
    let (_servers, addresses) = three_backends().await;
    let lb = common::balancer_with(Strategy::LeastConnections, &addresses).await;
    one_tick(&lb).await;

    let headers = HeaderMap::new();
    let meta = RequestMeta::new(&headers, None);

    let first = lb.select_backend(&meta).await.unwrap();
    let second = lb.select_backend(&meta).await.unwrap();
    assert_ne!(first.address(), second.address());

    // The untouched backend is the only one still at zero.
    let third = lb.select_backend(&meta).await.unwrap();
    assert_eq!(third.address(), addresses[2]);
    assert_eq!(third.connections(), 1);

    let total: i64 = lb.backends().await.iter().map(|b| b.connections()).sum();
    assert_eq!(total, 3);

    for backend in [&first, &second, &third] {
        let before = backend.connections();
        lb.release_backend(backend);
        assert_eq!(backend.connections(), before - 1);
    }
}

#[tokio::test]
async fn test_ip_hash_is_stable_while_alive_set_is_unchanged() {
    let (_servers, addresses) = three_backends().await;
    let lb = common::balancer_with(Strategy::IpHash, &addresses).await;
    one_tick(&lb).await;

    let mut headers = HeaderMap::new();
    headers.insert("x-real-ip", "198.51.100.23".parse().unwrap());
    let meta = RequestMeta::new(&headers, None);

    let chosen = lb.select_backend(&meta).await.unwrap();
    one_tick(&lb).await;
    for _ in 0..10 {
        assert_eq!(lb.select_backend(&meta).await.unwrap().address(), chosen.address());
    }
}

#[tokio::test]
async fn test_failing_backend_leaves_rotation_and_returns() {
    let healthy = common::start_backend(200).await;
    let flaky = common::start_backend(500).await;
    let addresses = vec![healthy.uri(), flaky.uri()];
    let lb = common::balancer_with(Strategy::RoundRobin, &addresses).await;
    let checker = HealthChecker::new(lb.clone(), settings()).unwrap();

    checker.check_all().await;

    let headers = HeaderMap::new();
    let meta = RequestMeta::new(&headers, None);
    for _ in 0..4 {
        assert_eq!(lb.select_backend(&meta).await.unwrap().address(), addresses[0]);
    }

    flaky.reset().await;
    wiremock::Mock::given(wiremock::matchers::path("/health"))
        .respond_with(wiremock::ResponseTemplate::new(200))
        .mount(&flaky)
        .await;
    checker.check_all().await;

    let mut seen = std::collections::HashSet::new();
    for _ in 0..4 {
        seen.insert(lb.select_backend(&meta).await.unwrap().address().to_string());
    }
    assert_eq!(seen.len(), 2);
}
