//! Ingress load balancer status.
//!
//! Status is written only once some replica reports that it actually
//! advertises the Service Name. Until then the status stays empty.

use super::replica_config::{pg_secret_labels, SECRET_TYPE_STATE};
use super::serve_config::ServiceConfig;
use super::Reconciler;
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::{Ingress, IngressLoadBalancerIngress, IngressPortStatus};
use kube::ResourceExt;
use serde::Deserialize;
use tracing::{debug, info};

/// Key of a replica state Secret naming the active profile key.
pub const CURRENT_PROFILE_KEY: &str = "_current-profile";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReplicaPrefs {
    #[serde(default)]
    advertise_services: Vec<String>,
}

/// Services a replica currently advertises, read from its state Secret.
pub fn advertised_by_replica(state: &Secret) -> Vec<String> {
    let Some(data) = state.data.as_ref() else {
        return Vec::new();
    };
    let Some(profile) = data.get(CURRENT_PROFILE_KEY) else {
        return Vec::new();
    };
    let Ok(profile_key) = std::str::from_utf8(&profile.0) else {
        return Vec::new();
    };
    data.get(profile_key.trim())
        .and_then(|prefs| serde_json::from_slice::<ReplicaPrefs>(&prefs.0).ok())
        .map(|p| p.advertise_services)
        .unwrap_or_default()
}

/// Load balancer status for an entry served under `fqdn`.
pub fn load_balancer_ingress(fqdn: &str, entry: &ServiceConfig) -> Vec<IngressLoadBalancerIngress> {
    let ports = entry
        .ports()
        .into_iter()
        .map(|port| IngressPortStatus {
            port: i32::from(port),
            protocol: "TCP".to_string(),
            error: None,
        })
        .collect();
    vec![IngressLoadBalancerIngress {
        hostname: Some(fqdn.to_string()),
        ports: Some(ports),
        ..Default::default()
    }]
}

fn current_load_balancer(ing: &Ingress) -> Vec<IngressLoadBalancerIngress> {
    ing.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.clone())
        .unwrap_or_default()
}

impl Reconciler {
    /// Whether any replica of the ProxyGroup advertises `service`.
    pub(crate) async fn is_serving(&self, proxy_group: &str, service: &str) -> Result<bool, ControllerError> {
        let states = self
            .store
            .list_secrets(
                &self.config.operator_namespace,
                &pg_secret_labels(proxy_group, SECRET_TYPE_STATE),
            )
            .await?;
        Ok(states
            .iter()
            .any(|s| advertised_by_replica(s).iter().any(|name| name == service)))
    }

    /// Write `status.loadBalancer.ingress` if it differs from `desired`.
    /// An empty list and no list are the same. Returns whether a write happened.
    pub(crate) async fn update_load_balancer_status(
        &self,
        ing: &Ingress,
        desired: Vec<IngressLoadBalancerIngress>,
    ) -> Result<bool, ControllerError> {
        if current_load_balancer(ing) == desired {
            debug!("Status of Ingress {}/{} already up-to-date", ing.namespace().unwrap_or_default(), ing.name_any());
            return Ok(false);
        }
        let namespace = ing.namespace().unwrap_or_default();
        let value = (!desired.is_empty()).then_some(desired);
        let cleared = value.is_none();
        self.store
            .patch_ingress_load_balancer(&namespace, &ing.name_any(), value)
            .await?;
        if cleared {
            info!("Cleared status of Ingress {}/{}", namespace, ing.name_any());
        } else {
            info!("Updated status of Ingress {}/{}", namespace, ing.name_any());
        }
        Ok(true)
    }
}
