use super::{Backend, BackendRegistry, LoadBalancer, RequestMeta};
use ahash::RandomState;
use async_trait::async_trait;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Balanceador Round Robin - distribuye las peticiones de manera circular
///
/// El cursor avanza en cada llamada y se reduce módulo el tamaño del conjunto
/// vivo en ese momento; si ese conjunto cambia, cambia el backend al que cae
/// cada valor del cursor.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    registry: BackendRegistry,
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select_backend(&self, _request: &RequestMeta<'_>) -> Option<Arc<Backend>> {
        let alive = self.registry.alive().await;
        if alive.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % alive.len();
        Some(alive[index].clone())
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }

    fn registry(&self) -> &BackendRegistry {
        &self.registry
    }
}

/// Balanceador Least Connections - selecciona el backend con menos conexiones activas
///
/// Seleccionar reserva una conexión en el backend elegido; `release_backend`
/// la devuelve. Los empates van al primero en orden de inserción.
#[derive(Debug, Default)]
pub struct LeastConnectionsBalancer {
    registry: BackendRegistry,
    // Buscar y reservar es un solo paso frente a otras selecciones.
    select_lock: Mutex<()>,
}

impl LeastConnectionsBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoadBalancer for LeastConnectionsBalancer {
    async fn select_backend(&self, _request: &RequestMeta<'_>) -> Option<Arc<Backend>> {
        let _guard = self.select_lock.lock().await;
        let alive = self.registry.alive().await;

        // Encuentra el backend con menos conexiones
        let selected = alive.iter().min_by_key(|b| b.connections()).cloned();

        // Incrementa el contador de conexiones
        if let Some(ref backend) = selected {
            backend.acquire();
        }

        selected
    }

    fn release_backend(&self, backend: &Backend) {
        backend.release();
    }

    fn name(&self) -> &str {
        "LeastConnections"
    }

    fn registry(&self) -> &BackendRegistry {
        &self.registry
    }
}

/// Balanceador IP Hash - el mismo cliente va al mismo backend mientras el
/// conjunto de backends vivos no cambie.
///
/// Sin anillo de hashing consistente: cualquier cambio de liveness puede
/// reasignar a todos los clientes.
#[derive(Debug)]
pub struct IpHashBalancer {
    registry: BackendRegistry,
    hasher: RandomState,
}

impl IpHashBalancer {
    pub fn new() -> Self {
        Self {
            registry: BackendRegistry::new(),
            // Semillas fijas: el mapeo es estable durante toda la vida del proceso.
            hasher: RandomState::with_seeds(
                0x243f_6a88_85a3_08d3,
                0x1319_8a2e_0370_7344,
                0xa409_3822_299f_31d0,
                0x082e_fa98_ec4e_6c89,
            ),
        }
    }

    fn hash_client(&self, client: &str) -> u64 {
        BuildHasher::hash_one(&self.hasher, client)
    }
}

impl Default for IpHashBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for IpHashBalancer {
    async fn select_backend(&self, request: &RequestMeta<'_>) -> Option<Arc<Backend>> {
        let alive = self.registry.alive().await;
        if alive.is_empty() {
            return None;
        }

        let client = request.client_ip();
        let index = (self.hash_client(&client) % alive.len() as u64) as usize;
        tracing::trace!("Client {} hashed to backend {}", client, alive[index].address());
        Some(alive[index].clone())
    }

    fn name(&self) -> &str {
        "IpHash"
    }

    fn registry(&self) -> &BackendRegistry {
        &self.registry
    }
}
