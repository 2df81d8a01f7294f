//! loadgate: balanceador de carga con reverse proxy.
//!
//! Cada estrategia tiene su registro de backends; el health checker escribe la
//! liveness en él y el dispatcher de axum toma un backend en préstamo por
//! petición.

pub mod config;
pub mod health;
pub mod load_balancer;
pub mod proxy;
pub mod status;
