//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Kubernetes
//! client, the tailnet client and the reconciler together and runs the
//! Ingress watcher until shutdown.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::store::KubeClusterStore;
use crate::watcher::Watcher;
use crds::ProxyGroup;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client};
use std::sync::Arc;
use tailnet_client::{TailnetClient, TailnetClientTrait};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Name the controller reports events under.
const CONTROLLER_NAME: &str = "ingress-pg-controller";

/// Main controller for HA Ingress management.
pub struct Controller {
    ingress_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watcher.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing HA Ingress controller");

        // Create Kubernetes client; every API call is bounded by the call timeout
        let mut kube_config = kube::Config::infer()
            .await
            .map_err(|e| ControllerError::InvalidConfig(format!("Failed to infer Kubernetes config: {}", e)))?;
        kube_config.connect_timeout = Some(config.call_timeout);
        kube_config.read_timeout = Some(config.call_timeout);
        kube_config.write_timeout = Some(config.call_timeout);
        let kube_client = Client::try_from(kube_config)?;

        // Create tailnet client
        let tailnet_client = TailnetClient::new(
            config.api_url.clone(),
            config.api_key.clone(),
            config.tailnet.clone(),
            config.local_api_url.clone(),
        )?;

        // Validate credentials before proceeding
        info!("Validating tailnet API key and connectivity...");
        tailnet_client.validate_token().await.map_err(|e| {
            error!("Failed to validate tailnet API key: {}", e);
            error!("Please ensure:");
            error!("  1. TS_API_KEY environment variable is set correctly");
            error!("  2. The key is allowed to manage VIP services");
            error!("  3. The coordination API is reachable at {}", config.api_url);
            ControllerError::Tailnet(e)
        })?;
        info!("Tailnet API key validated and connectivity established");

        let ingress_api: Api<Ingress> = match config.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };
        let proxy_group_api: Api<ProxyGroup> = Api::all(kube_client.clone());

        let store = KubeClusterStore::new(kube_client, config.watch_namespace.clone(), CONTROLLER_NAME);
        let concurrency = config.reconcile_concurrency;
        let reconciler = Arc::new(Reconciler::new(store, tailnet_client, config));

        let watcher_instance = Watcher::new(reconciler, ingress_api, proxy_group_api, concurrency);
        let ingress_watcher = tokio::spawn(async move { watcher_instance.watch_ingresses().await });

        Ok(Self { ingress_watcher })
    }

    /// Runs the controller until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("HA Ingress controller running");

        self.ingress_watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("Ingress watcher panicked: {}", e)))?
            .map_err(|e| ControllerError::Watch(format!("Ingress watcher error: {}", e)))?;

        info!("HA Ingress controller stopped");
        Ok(())
    }
}
