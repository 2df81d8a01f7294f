use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Estado mutable de un backend.
///
/// Cada campo es un atómico independiente: nadie necesita una vista
/// consistente entre contadores, así que nada pasa por el lock del registro.
#[derive(Debug)]
pub struct Backend {
    address: String,
    alive: AtomicBool,
    connections: AtomicI64,
    success_count: AtomicU64,
    error_count: AtomicU64,
}

impl Backend {
    /// Crea un backend que no recibe tráfico hasta que un health check lo marque vivo.
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            address: address.trim_end_matches('/').to_string(),
            alive: AtomicBool::new(false),
            connections: AtomicI64::new(0),
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// URL base del backend, sin barra final.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Cambia el flag de liveness y retorna el valor anterior.
    pub(crate) fn set_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::AcqRel)
    }

    pub fn connections(&self) -> i64 {
        self.connections.load(Ordering::Acquire)
    }

    /// Reserva una conexión en curso.
    pub(crate) fn acquire(&self) {
        self.connections.fetch_add(1, Ordering::AcqRel);
    }

    /// Libera una conexión en curso, sin bajar de cero.
    pub(crate) fn release(&self) {
        let released = self
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current > 0).then(|| current - 1)
            });

        if released.is_err() {
            tracing::warn!(
                "Unmatched connection release on backend {}, count already at zero",
                self.address
            );
        }
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }
}
