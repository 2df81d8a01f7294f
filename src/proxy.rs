use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use hyper::body::{Body as HttpBody, Bytes, Frame, Incoming, SizeHint};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::{
    load_balancer::{lease_backend, BackendLease, LoadBalancer, RequestMeta},
    status::StatusReport,
};

pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

#[derive(Clone)]
pub struct ProxyState {
    pub load_balancer: Arc<dyn LoadBalancer>,
    pub client: UpstreamClient,
    pub timeout: Duration,
}

impl ProxyState {
    pub fn new(load_balancer: Arc<dyn LoadBalancer>, timeout: Duration) -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            load_balancer,
            client,
            timeout,
        }
    }
}

/// Fallos del proxy que se devuelven al cliente.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoBackendAvailable,
    #[error("Error creating proxy request: {0}")]
    InvalidUpstreamUri(String),
    #[error("Backend server error")]
    Upstream(#[from] hyper_util::client::legacy::Error),
    #[error("Backend server timed out")]
    Timeout,
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::InvalidUpstreamUri(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Rutas del balanceador: `/health` propio y todo lo demás al backend.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", any(gateway_health))
        .fallback(proxy_handler)
        .with_state(state)
}

/// Handler principal del proxy que reenvía todas las peticiones
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut req: Request,
) -> Result<Response, ProxyError> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);

    let lease = {
        let meta = RequestMeta::new(req.headers(), peer);
        match lease_backend(&state.load_balancer, &meta).await {
            Some(lease) => lease,
            None => {
                tracing::error!(
                    "No healthy backends available for request: {} {}",
                    req.method(),
                    req.uri().path()
                );
                return Err(ProxyError::NoBackendAvailable);
            }
        }
    };
    let backend = Arc::clone(lease.backend());

    tracing::info!(
        "Proxying {} {} to backend {}",
        req.method(),
        req.uri(),
        backend.address()
    );

    // Construye la URL del backend
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let backend_url = format!("{}{}", backend.address(), path_and_query);

    let uri = match backend_url.parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!("Failed to parse backend URL {}: {}", backend_url, e);
            return Err(ProxyError::InvalidUpstreamUri(e.to_string()));
        }
    };

    let original_host = req.headers().get("host").cloned();
    *req.uri_mut() = uri.clone();
    set_forwarding_headers(&mut req, peer, original_host, &uri);

    // Reenvía la petición al backend
    let response = match tokio::time::timeout(state.timeout, state.client.request(req)).await {
        Ok(Ok(res)) => res,
        Ok(Err(e)) => {
            tracing::error!("Failed to proxy request to backend {}: {}", backend.address(), e);
            backend.record_error();
            return Err(ProxyError::Upstream(e));
        }
        Err(_) => {
            tracing::error!(
                "Backend {} did not respond within {:?}",
                backend.address(),
                state.timeout
            );
            backend.record_error();
            return Err(ProxyError::Timeout);
        }
    };

    // El lease viaja con el cuerpo: la conexión se libera al terminar de enviarlo.
    let (parts, body) = response.into_parts();
    let body = Body::new(TrackedBody::new(body, lease));

    Ok(Response::from_parts(parts, body))
}

fn set_forwarding_headers(
    req: &mut Request,
    peer: Option<SocketAddr>,
    original_host: Option<HeaderValue>,
    uri: &Uri,
) {
    let headers = req.headers_mut();

    if let Some(peer) = peer {
        let forwarded = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{}, {}", existing, peer.ip()),
            None => peer.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            headers.insert("x-forwarded-for", value);
        }
    }

    if let Some(host) = original_host {
        headers.insert("x-forwarded-host", host);
    }

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
            headers.insert("x-request-id", value);
        }
    }

    // Actualiza el header Host
    if let Some(host) = uri.host() {
        let host_header = match uri.port_u16() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        if let Ok(header_value) = HeaderValue::from_str(&host_header) {
            headers.insert("host", header_value);
        }
    }
}

/// Cuerpo de respuesta que registra el resultado en el backend y retiene su lease.
///
/// Un error del stream del backend cuenta como error. Llegar al final cuenta
/// como éxito, y también que el cliente abandone la respuesta a medias: ahí el
/// backend respondió bien y el corte es del lado del cliente, a diferencia de
/// un error del stream. En cualquier caso el lease se libera una sola vez.
struct TrackedBody<B = Incoming> {
    inner: B,
    lease: Option<BackendLease>,
}

impl<B> TrackedBody<B> {
    fn new(inner: B, lease: BackendLease) -> Self {
        Self {
            inner,
            lease: Some(lease),
        }
    }

    fn finish(&mut self, ok: bool) {
        if let Some(lease) = self.lease.take() {
            if ok {
                lease.backend().record_success();
            } else {
                lease.backend().record_error();
            }
        }
    }
}

impl<B> HttpBody for TrackedBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(None) => this.finish(true),
            Poll::Ready(Some(Err(e))) => {
                tracing::error!("Error streaming response body: {}", e);
                this.finish(false);
            }
            _ => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for TrackedBody<B> {
    fn drop(&mut self) {
        self.finish(true);
    }
}

/// Handler de health check del balanceador mismo
pub async fn gateway_health(State(state): State<ProxyState>) -> impl IntoResponse {
    let backends = state.load_balancer.backends().await;
    let report = StatusReport::from_backends(&backends);

    (report.status_code(), Json(report))
}
