//! Reconciliation logic for Ingresses served by ProxyGroups.
//!
//! This module is organized by the resource each step converges:
//! - `validate`: Ingress and ProxyGroup checks, live Service Names
//! - `hostname`: Service Name and FQDN derivation
//! - `serve_config`: shared per-ProxyGroup serve config
//! - `vip_service`: tailnet VIP service records and owner references
//! - `certs`: certificate Secret, Role and RoleBinding per hostname
//! - `replica_config`: advertised services in each replica's config
//! - `status`: Ingress load balancer status
//! - `phase`: per-Ingress lifecycle
//! - `ingress`: the reconcile entry point tying the steps together

pub mod certs;
pub mod hostname;
pub mod ingress;
pub mod phase;
pub mod replica_config;
pub mod serve_config;
pub mod status;
pub mod validate;
pub mod vip_service;


use crate::backoff::ExponentialBackoff;
use crate::config::OperatorConfig;
use crate::error::{ControllerError, ErrorClass};
use crate::store::ClusterStore;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tailnet_client::TailnetClientTrait;
use tracing::{debug, error, warn};

/// Finalizer guarding release of an Ingress' shared resources.
pub const FINALIZER: &str = "tailscale.com/ingress-pg-resource";

/// Consecutive transient failures before they are logged as warnings.
const TRANSIENT_WARN_THRESHOLD: u32 = 5;

/// Delay before retrying a lost compare-and-swap.
const CONFLICT_RETRY: Duration = Duration::from_millis(100);

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: ExponentialBackoff::new(5, 300), // 5 seconds min, 5 minutes max
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles Ingresses onto ProxyGroups.
pub struct Reconciler {
    pub(crate) store: Box<dyn ClusterStore>,
    pub(crate) tailnet: Box<dyn TailnetClientTrait + Send + Sync>,
    pub(crate) config: OperatorConfig,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: impl ClusterStore + 'static,
        tailnet: impl TailnetClientTrait + Send + Sync + 'static,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store: Box::new(store),
            tailnet: Box::new(tailnet),
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run an external call under the per-call timeout. A timeout is a
    /// transient failure.
    pub(crate) async fn bounded<T, E, F>(&self, what: &str, call: F) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, E>>,
        ControllerError: From<E>,
    {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(ControllerError::from),
            Err(_) => Err(ControllerError::Transient(format!(
                "{} timed out after {:?}",
                what, self.config.call_timeout
            ))),
        }
    }

    /// Get the backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                let backoff_seconds = state.backoff.next_backoff_seconds();
                let error_count = state.error_count;
                (backoff_seconds, error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (5, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            let state = states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new);
            state.increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }

    /// Consecutive failures recorded for a resource.
    pub fn error_count(&self, resource_key: &str) -> u32 {
        self.backoff_states
            .lock()
            .ok()
            .and_then(|states| states.get(resource_key).map(|s| s.error_count))
            .unwrap_or(0)
    }

    /// Requeue decision for a failed reconcile of `resource_key`.
    ///
    /// Callers record the failure with `increment_error` first.
    pub fn requeue_for_error(&self, resource_key: &str, err: &ControllerError) -> Action {
        match err.class() {
            ErrorClass::Conflict => {
                debug!("Conflict while reconciling {}, retrying: {}", resource_key, err);
                Action::requeue(CONFLICT_RETRY)
            }
            ErrorClass::Validation => {
                debug!("Ingress {} is invalid, waiting for a change: {}", resource_key, err);
                Action::await_change()
            }
            class => {
                let (backoff_seconds, error_count) = self.get_backoff_for_resource(resource_key);
                match class {
                    ErrorClass::Invariant => {
                        error!("Invariant violated while reconciling {}: {}", resource_key, err)
                    }
                    ErrorClass::Transient if error_count >= TRANSIENT_WARN_THRESHOLD => warn!(
                        "Reconciling {} failed {} times in a row, retrying in {}s: {}",
                        resource_key, error_count, backoff_seconds, err
                    ),
                    _ => debug!(
                        "Reconciling {} failed (attempt {}), retrying in {}s: {}",
                        resource_key, error_count, backoff_seconds, err
                    ),
                }
                Action::requeue(Duration::from_secs(backoff_seconds))
            }
        }
    }
}
