pub mod backend;
pub mod registry;
pub mod strategies;

pub use backend::Backend;
pub use registry::BackendRegistry;

use async_trait::async_trait;
use axum::http::HeaderMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

/// Datos de la petición que las estrategias pueden usar para elegir backend.
#[derive(Debug, Clone, Copy)]
pub struct RequestMeta<'a> {
    pub headers: &'a HeaderMap,
    pub peer: Option<SocketAddr>,
}

impl<'a> RequestMeta<'a> {
    pub fn new(headers: &'a HeaderMap, peer: Option<SocketAddr>) -> Self {
        Self { headers, peer }
    }

    /// Identificador del cliente: primer salto de `X-Forwarded-For`, luego
    /// `X-Real-IP`, luego la IP del socket. Vacío si no se conoce ninguno.
    pub fn client_ip(&self) -> String {
        let header = |name: &str| {
            self.headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        if let Some(forwarded) = header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next() {
                return first.trim().to_string();
            }
        }

        if let Some(real_ip) = header("x-real-ip") {
            return real_ip.to_string();
        }

        self.peer
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }
}

/// Trait que define el comportamiento de un balanceador de carga.
/// Implementa este trait para crear nuevos algoritmos de balanceo.
///
/// Cada estrategia tiene su propio [`BackendRegistry`]; los métodos del
/// registro tienen implementaciones por defecto que delegan en él.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Selecciona un backend vivo para la petición.
    ///
    /// Retorna `None` si no hay backends registrados o ninguno está vivo.
    /// Algunas estrategias reservan una conexión al seleccionar: cada `Some`
    /// debe emparejarse con exactamente un [`LoadBalancer::release_backend`].
    async fn select_backend(&self, request: &RequestMeta<'_>) -> Option<Arc<Backend>>;

    /// Notifica al balanceador que una petición ha sido completada.
    fn release_backend(&self, _backend: &Backend) {}

    /// Retorna el nombre del algoritmo de balanceo
    fn name(&self) -> &str;

    fn registry(&self) -> &BackendRegistry;

    async fn add_backend(&self, backend: Arc<Backend>) {
        self.registry().add(backend).await;
    }

    async fn remove_backend(&self, address: &str) -> bool {
        self.registry().remove(address).await
    }

    async fn backends(&self) -> Vec<Arc<Backend>> {
        self.registry().list().await
    }

    /// Retorna el flag de liveness anterior, `None` si la dirección no existe.
    async fn update_backend_status(&self, address: &str, alive: bool) -> Option<bool> {
        self.registry().update_status(address, alive).await
    }
}

/// Backend seleccionado junto con la obligación de liberarlo.
///
/// La conexión se devuelve al balanceador una sola vez, al soltar el lease,
/// sea cual sea el camino que tomó la petición.
pub struct BackendLease {
    backend: Arc<Backend>,
    load_balancer: Arc<dyn LoadBalancer>,
}

impl BackendLease {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl fmt::Debug for BackendLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLease")
            .field("backend", &self.backend.address())
            .field("strategy", &self.load_balancer.name())
            .finish()
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.load_balancer.release_backend(&self.backend);
    }
}

/// Selecciona un backend y lo envuelve en un [`BackendLease`].
pub async fn lease_backend(
    load_balancer: &Arc<dyn LoadBalancer>,
    request: &RequestMeta<'_>,
) -> Option<BackendLease> {
    let backend = load_balancer.select_backend(request).await?;
    Some(BackendLease {
        backend,
        load_balancer: Arc::clone(load_balancer),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    LeastConnections,
    IpHash,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round-robin",
            Strategy::LeastConnections => "least-connections",
            Strategy::IpHash => "ip-hash",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid algorithm: {0}. Valid options: round-robin, least-connections, ip-hash")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "round-robin" | "roundrobin" => Ok(Strategy::RoundRobin),
            "least-connections" | "leastconnections" => Ok(Strategy::LeastConnections),
            "ip-hash" | "iphash" => Ok(Strategy::IpHash),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Factory para crear diferentes tipos de balanceadores
pub fn create_load_balancer(strategy: Strategy) -> Arc<dyn LoadBalancer> {
    match strategy {
        Strategy::RoundRobin => Arc::new(strategies::RoundRobinBalancer::new()),
        Strategy::LeastConnections => Arc::new(strategies::LeastConnectionsBalancer::new()),
        Strategy::IpHash => Arc::new(strategies::IpHashBalancer::new()),
    }
}
