use super::backend::Backend;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lista ordenada de backends compartida entre selección y health checks.
///
/// Conserva el orden de inserción; no rechaza duplicados. Las direcciones se
/// comparan sin la barra final, igual que las guarda [`Backend::new`].
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, backend: Arc<Backend>) {
        self.backends.write().await.push(backend);
    }

    /// Elimina el primer backend registrado bajo `address`.
    pub async fn remove(&self, address: &str) -> bool {
        let address = normalize(address);
        let mut backends = self.backends.write().await;
        match backends.iter().position(|b| b.address() == address) {
            Some(index) => {
                backends.remove(index);
                true
            }
            None => false,
        }
    }

    /// Copia de todos los backends registrados.
    pub async fn list(&self) -> Vec<Arc<Backend>> {
        self.backends.read().await.clone()
    }

    /// Copia de los backends marcados como vivos, en orden de inserción.
    pub async fn alive(&self) -> Vec<Arc<Backend>> {
        self.backends
            .read()
            .await
            .iter()
            .filter(|b| b.is_alive())
            .cloned()
            .collect()
    }

    /// Marca la liveness del primer backend con esa `address`.
    ///
    /// Retorna el flag anterior, o `None` si no hay tal backend.
    pub async fn update_status(&self, address: &str, alive: bool) -> Option<bool> {
        let address = normalize(address);
        let backends = self.backends.write().await;
        backends
            .iter()
            .find(|b| b.address() == address)
            .map(|b| b.set_alive(alive))
    }
}

fn normalize(address: &str) -> &str {
    address.trim_end_matches('/')
}
