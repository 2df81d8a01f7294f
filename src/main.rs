use anyhow::Result;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loadgate::{
    config::Config,
    health::HealthChecker,
    load_balancer::{create_load_balancer, Backend, LoadBalancer},
    proxy::{self, ProxyState},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializa el sistema de logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loadgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting loadgate...");

    // Carga y valida la configuración antes de construir nada
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Crea el load balancer
    let load_balancer = create_load_balancer(config.strategy);
    tracing::info!("Using load balancer: {}", load_balancer.name());

    for address in &config.backends {
        load_balancer
            .add_backend(Arc::new(Backend::new(address.clone())))
            .await;
        tracing::info!("Added backend: {}", address);
    }

    // Crea el health checker; la primera ronda corre de inmediato
    let health_checker = Arc::new(HealthChecker::new(
        load_balancer.clone(),
        config.health_check.clone(),
    )?);
    health_checker.start();

    let proxy_state = ProxyState::new(load_balancer, config.proxy_timeout);
    let app = proxy::router(proxy_state).layer(TraceLayer::new_for_http());

    // Inicia el servidor
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("loadgate listening on {}", addr);
    tracing::info!("  - GET  /health  - Load balancer status");
    tracing::info!("  - *    /*       - Proxy to {} backend", config.strategy);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let health_checker = health_checker.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Starting graceful shutdown...");
            // El health checker se detiene antes de dejar de aceptar conexiones
            health_checker.stop();
            let _ = shutdown_tx.send(true);
        });
    }

    let mut graceful_rx = shutdown_rx.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = graceful_rx.wait_for(|stopping| *stopping).await;
    });

    let grace_period = config.shutdown_grace_period;
    let mut drain_rx = shutdown_rx;
    tokio::select! {
        result = server.into_future() => {
            result?;
            tracing::info!("Graceful shutdown completed");
        }
        _ = async move {
            let _ = drain_rx.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(grace_period).await;
        } => {
            tracing::warn!(
                "In-flight requests did not drain within {:?}, forcing shutdown",
                grace_period
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
