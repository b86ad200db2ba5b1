//! Kubernetes resource watchers.
//!
//! This module handles watching Ingresses (and the ProxyGroups they are
//! assigned to) and triggering reconciliation using kube_runtime::Controller.

use crate::error::ControllerError;
use crate::reconciler::validate::target_proxy_group;
use crate::reconciler::Reconciler;
use crds::ProxyGroup;
use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, ResourceExt};
use kube_runtime::controller::Config as ControllerConfig;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Watches Ingresses and ProxyGroups for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    ingress_api: Api<Ingress>,
    proxy_group_api: Api<ProxyGroup>,
    concurrency: u16,
}

fn resource_key(ing: &Ingress) -> String {
    format!("{}/{}", ing.namespace().unwrap_or_default(), ing.name_any())
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        ingress_api: Api<Ingress>,
        proxy_group_api: Api<ProxyGroup>,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            ingress_api,
            proxy_group_api,
            concurrency,
        }
    }

    /// Starts watching Ingress resources.
    ///
    /// A ProxyGroup change requeues every Ingress assigned to it, so that
    /// Ingresses waiting for their ProxyGroup proceed as soon as it is ready.
    pub async fn watch_ingresses(&self) -> Result<(), ControllerError> {
        info!("Starting Ingress watcher");

        // Error policy: record the failure and let the error class pick the delay
        let error_policy = |obj: Arc<Ingress>, error: &ControllerError, ctx: Arc<Reconciler>| {
            let key = resource_key(&obj);
            ctx.increment_error(&key);
            ctx.requeue_for_error(&key, error)
        };

        let reconcile = |obj: Arc<Ingress>, ctx: Arc<Reconciler>| async move {
            debug!("Reconciling Ingress {}", resource_key(&obj));
            ctx.reconcile_ingress(&obj).await
        };

        // Debounce waits 5 seconds after the last event before reconciling
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(5))
            .concurrency(self.concurrency);

        let controller = Controller::new(self.ingress_api.clone(), watcher::Config::default())
            .with_config(controller_config);
        let ingresses = controller.store();
        let ingress_class = self.reconciler.config.ingress_class.clone();

        controller
            .watches(self.proxy_group_api.clone(), watcher::Config::default(), move |pg| {
                let name = pg.name_any();
                ingresses
                    .state()
                    .into_iter()
                    .filter(|ing| target_proxy_group(ing, &ingress_class) == Some(name.as_str()))
                    .map(|ing| ObjectRef::from_obj(&*ing))
                    .collect::<Vec<_>>()
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                match res {
                    Ok((obj, action)) => debug!("Reconciled Ingress {}: {:?}", obj, action),
                    Err(e) => error!("Controller error for Ingress: {}", e),
                }
            })
            .await;

        Ok(())
    }
}
