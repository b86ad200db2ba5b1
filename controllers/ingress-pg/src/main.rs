//! HA Ingress Controller
//!
//! Publishes Kubernetes Ingresses as highly available tailnet VIP services
//! served by every replica of an ingress ProxyGroup:
//! - Claims a VIP service per hostname, shared with other clusters' operators
//! - Provisions the per-hostname certificate Secret and its RBAC
//! - Maintains the ProxyGroup serve config and the replicas' advertised services
//! - Reports the served hostname in the Ingress load balancer status

mod backoff;
mod config;
mod controller;
mod error;
mod reconciler;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and reqwest both pull rustls; pick the provider explicitly
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed, keeping it");
    }

    info!("Starting HA Ingress controller");

    // Load configuration from environment variables
    let config = OperatorConfig::from_env()?;

    info!("Configuration:");
    info!("  Coordination API: {}", config.api_url);
    info!("  Operator ID: {}", config.operator_id);
    info!("  Operator namespace: {}", config.operator_namespace);
    info!("  Ingress class: {}", config.ingress_class);
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
