use crate::load_balancer::Backend;
use axum::http::StatusCode;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub url: String,
    pub alive: bool,
    pub connections: i64,
    pub success_count: u64,
    pub error_count: u64,
}

/// Estado que sirve el endpoint `/health` del propio balanceador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub healthy_backends: usize,
    pub total_backends: usize,
    pub backends: Vec<BackendStatus>,
}

impl StatusReport {
    pub fn from_backends(backends: &[Arc<Backend>]) -> Self {
        let backends: Vec<BackendStatus> = backends
            .iter()
            .map(|b| BackendStatus {
                url: b.address().to_string(),
                alive: b.is_alive(),
                connections: b.connections(),
                success_count: b.success_count(),
                error_count: b.error_count(),
            })
            .collect();

        let healthy_backends = backends.iter().filter(|b| b.alive).count();

        Self {
            status: if healthy_backends > 0 { "healthy" } else { "unhealthy" },
            healthy_backends,
            total_backends: backends.len(),
            backends,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy_backends > 0
    }

    /// 200 mientras haya al menos un backend vivo, 503 si no.
    pub fn status_code(&self) -> StatusCode {
        if self.is_healthy() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends(alive: &[bool]) -> Vec<Arc<Backend>> {
        alive
            .iter()
            .enumerate()
            .map(|(i, is_alive)| {
                let backend = Backend::new(format!("http://127.0.0.1:{}", 3001 + i));
                backend.set_alive(*is_alive);
                Arc::new(backend)
            })
            .collect()
    }

    #[test]
    fn test_two_of_three_alive_is_healthy() {
        let backends = backends(&[true, false, true]);
        backends[0].record_success();
        backends[1].record_error();
        backends[2].acquire();

        let report = StatusReport::from_backends(&backends);

        assert_eq!(report.status, "healthy");
        assert_eq!(report.healthy_backends, 2);
        assert_eq!(report.total_backends, 3);
        assert_eq!(report.status_code(), StatusCode::OK);
        assert_eq!(
            report.backends[1],
            BackendStatus {
                url: "http://127.0.0.1:3002".to_string(),
                alive: false,
                connections: 0,
                success_count: 0,
                error_count: 1,
            }
        );
        assert_eq!(report.backends[2].connections, 1);
    }

    #[test]
    fn test_nothing_alive_is_unavailable() {
        let report = StatusReport::from_backends(&backends(&[false, false]));

        assert_eq!(report.status, "unhealthy");
        assert!(!report.is_healthy());
        assert_eq!(report.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let empty = StatusReport::from_backends(&[]);
        assert_eq!(empty.total_backends, 0);
        assert_eq!(empty.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_serialized_field_names() {
        let report = StatusReport::from_backends(&backends(&[true]));
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["healthy_backends"], 1);
        assert_eq!(json["total_backends"], 1);
        let backend = &json["backends"][0];
        assert_eq!(backend["url"], "http://127.0.0.1:3001");
        assert_eq!(backend["alive"], true);
        assert_eq!(backend["connections"], 0);
        assert_eq!(backend["success_count"], 0);
        assert_eq!(backend["error_count"], 0);
    }
}
