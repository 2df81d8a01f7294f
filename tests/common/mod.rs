//! Shared helpers for the integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use loadgate::load_balancer::{create_load_balancer, Backend, LoadBalancer, Strategy};
use loadgate::proxy::{self, ProxyState};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Start a mock backend whose `/health` answers with `status`.
pub async fn start_backend(health_status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(health_status))
        .mount(&server)
        .await;
    server
}

/// Build a balancer with the given addresses registered, all still dead.
pub async fn balancer_with(strategy: Strategy, addresses: &[String]) -> Arc<dyn LoadBalancer> {
    let lb = create_load_balancer(strategy);
    for address in addresses {
        lb.add_backend(Arc::new(Backend::new(address.clone()))).await;
    }
    lb
}

/// Serve the proxy router on an ephemeral port and return its address.
#[allow(dead_code)]
pub async fn start_proxy(lb: Arc<dyn LoadBalancer>, timeout: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = proxy::router(ProxyState::new(lb, timeout));

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

/// Wait until `condition` holds, polling for up to one second.
#[allow(dead_code)]
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
