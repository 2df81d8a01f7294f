use crate::load_balancer::{Backend, LoadBalancer};
use futures::future::join_all;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Parámetros del health checker.
#[derive(Debug, Clone)]
pub struct HealthCheckSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub path: String,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            path: "/health".to_string(),
        }
    }
}

/// Servicio que monitorea la salud de los backends
///
/// La liveness se escribe a través del balanceador, así la siguiente selección
/// la ve. `start` y `stop` son idempotentes; un checker detenido puede
/// arrancarse de nuevo.
pub struct HealthChecker {
    load_balancer: Arc<dyn LoadBalancer>,
    client: Client,
    settings: HealthCheckSettings,
    running: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

/// Loop en segundo plano: su token de cancelación y la tarea que lo ejecuta.
struct Worker {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl HealthChecker {
    pub fn new(
        load_balancer: Arc<dyn LoadBalancer>,
        settings: HealthCheckSettings,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(settings.timeout).build()?;

        Ok(Self {
            load_balancer,
            client,
            settings,
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Inicia el chequeo periódico de salud de los backends
    ///
    /// La primera ronda corre de inmediato. No hace nada si ya está corriendo.
    /// Si un loop anterior todavía termina su última ronda, el nuevo espera a
    /// que acabe antes de sondear.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.worker_slot();
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Health checker already running");
            return;
        }

        tracing::info!(
            "Starting health checker (interval: {:?}, timeout: {:?}, path: {})",
            self.settings.interval,
            self.settings.timeout,
            self.settings.path
        );

        let previous = slot.take().map(|worker| worker.task);
        let token = CancellationToken::new();
        let checker = Arc::clone(self);
        let loop_token = token.clone();

        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::error!("Previous health check loop failed: {}", e);
                }
            }

            let mut ticker = interval(checker.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    // La cancelación gana sobre un tick ya vencido.
                    biased;
                    _ = loop_token.cancelled() => {
                        tracing::info!("Health checker stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        // Una ronda en curso no se interrumpe.
                        checker.check_all().await;
                    }
                }
            }
        });

        *slot = Some(Worker { token, task });
    }

    /// Pide al loop que termine en su próximo despertar. No hace nada si ya
    /// está detenido.
    pub fn stop(&self) {
        let slot = self.worker_slot();
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        tracing::info!("Stopping health checker");
        // El handle se queda en el slot para que un `start` posterior lo espere.
        if let Some(worker) = slot.as_ref() {
            worker.token.cancel();
        }
    }

    fn worker_slot(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sondea todos los backends registrados en paralelo y aplica los resultados.
    pub async fn check_all(&self) {
        let backends = self.load_balancer.backends().await;
        if backends.is_empty() {
            tracing::debug!("No backends registered, skipping health check round");
            return;
        }

        join_all(backends.iter().map(|backend| self.check_backend(backend))).await;
    }

    /// Sondea un backend y escribe su liveness en el balanceador.
    ///
    /// Retorna `true` cuando el flag de liveness cambió.
    pub async fn check_backend(&self, backend: &Backend) -> bool {
        let alive = self.check_health(backend).await;

        match self
            .load_balancer
            .update_backend_status(backend.address(), alive)
            .await
        {
            Some(previous) if previous != alive => {
                if alive {
                    tracing::info!("Backend {} status changed to UP", backend.address());
                } else {
                    tracing::warn!("Backend {} status changed to DOWN", backend.address());
                }
                true
            }
            Some(_) => false,
            None => {
                tracing::debug!(
                    "Backend {} was removed during health check",
                    backend.address()
                );
                false
            }
        }
    }

    /// Verifica la salud de un backend específico
    ///
    /// Una respuesta 2xx dentro del timeout es sana; cualquier otra cosa no.
    /// Incrementa el contador de éxitos o de errores del backend.
    pub async fn check_health(&self, backend: &Backend) -> bool {
        let health_url = format!("{}{}", backend.address(), self.settings.path);

        let is_healthy = match self.client.get(&health_url).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    tracing::debug!("Backend {} is healthy", backend.address());
                    true
                } else {
                    tracing::warn!(
                        "Backend {} returned status {}",
                        backend.address(),
                        response.status()
                    );
                    false
                }
            }
            Err(e) => {
                tracing::warn!("Backend {} health check failed: {}", backend.address(), e);
                false
            }
        };

        if is_healthy {
            backend.record_success();
        } else {
            backend.record_error();
        }

        is_healthy
    }
}
