//! Object store access for the reconciler.
//!
//! `ClusterStore` narrows the Kubernetes API down to the typed calls the
//! HA Ingress reconciler makes. Writes of existing objects carry the
//! resource version that was read, so a concurrent writer surfaces as a
//! 409 (`ErrorClass::Conflict`) instead of a silent overwrite.

#[cfg(test)]
pub mod mock;

use crate::error::ControllerError;
use crds::ProxyGroup;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressLoadBalancerIngress};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Typed object store operations used by the reconciler.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    // Ingresses
    /// All Ingresses in the watched scope.
    async fn list_ingresses(&self) -> Result<Vec<Ingress>, ControllerError>;
    /// Replace the finalizer list, conditional on the Ingress' resource version.
    async fn set_ingress_finalizers(
        &self,
        ingress: &Ingress,
        finalizers: Vec<String>,
    ) -> Result<(), ControllerError>;
    /// Set (or clear with `None`) `status.loadBalancer.ingress`.
    async fn patch_ingress_load_balancer(
        &self,
        namespace: &str,
        name: &str,
        ingress: Option<Vec<IngressLoadBalancerIngress>>,
    ) -> Result<(), ControllerError>;

    // ProxyGroups
    async fn get_proxy_group(&self, name: &str) -> Result<Option<ProxyGroup>, ControllerError>;
    async fn list_proxy_groups(&self) -> Result<Vec<ProxyGroup>, ControllerError>;

    // Backend Services
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ControllerError>;

    // Serve config documents
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ControllerError>;
    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ControllerError>;

    // Secrets (certs, replica config and replica state)
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError>;
    async fn list_secrets(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, ControllerError>;
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ControllerError>;
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ControllerError>;
    /// Delete; absent objects are not an error.
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    // RBAC
    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>, ControllerError>;
    async fn create_role(&self, role: &Role) -> Result<Role, ControllerError>;
    async fn replace_role(&self, role: &Role) -> Result<Role, ControllerError>;
    async fn delete_role(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;
    async fn get_role_binding(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>, ControllerError>;
    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<RoleBinding, ControllerError>;
    async fn replace_role_binding(&self, binding: &RoleBinding) -> Result<RoleBinding, ControllerError>;
    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    /// Record a Warning event on the Ingress. Failures are logged, never returned.
    async fn publish_warning(&self, ingress: &Ingress, reason: &str, note: String);
}

/// Render a label map as a Kubernetes label selector.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn ignore_not_found(result: Result<(), kube::Error>) -> Result<(), ControllerError> {
    match result {
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        other => other.map_err(ControllerError::from),
    }
}

/// `ClusterStore` backed by the Kubernetes API.
pub struct KubeClusterStore {
    client: Client,
    ingress_namespace: Option<String>,
    recorder: Recorder,
}

impl KubeClusterStore {
    /// Create a store; `ingress_namespace` restricts Ingress listing.
    pub fn new(client: Client, ingress_namespace: Option<String>, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            ingress_namespace,
        }
    }

    fn ingresses(&self) -> Api<Ingress> {
        match &self.ingress_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ClusterStore for KubeClusterStore {
    async fn list_ingresses(&self) -> Result<Vec<Ingress>, ControllerError> {
        Ok(self.ingresses().list(&ListParams::default()).await?.items)
    }

    async fn set_ingress_finalizers(
        &self,
        ingress: &Ingress,
        finalizers: Vec<String>,
    ) -> Result<(), ControllerError> {
        let namespace = ingress.namespace().unwrap_or_default();
        // resourceVersion in a merge patch is honoured as a precondition.
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": ingress.resource_version(),
            }
        });
        self.namespaced::<Ingress>(&namespace)
            .patch(&ingress.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_ingress_load_balancer(
        &self,
        namespace: &str,
        name: &str,
        ingress: Option<Vec<IngressLoadBalancerIngress>>,
    ) -> Result<(), ControllerError> {
        let patch = serde_json::json!({
            "status": {
                "loadBalancer": {
                    "ingress": ingress,
                }
            }
        });
        self.namespaced::<Ingress>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_proxy_group(&self, name: &str) -> Result<Option<ProxyGroup>, ControllerError> {
        let api: Api<ProxyGroup> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_proxy_groups(&self) -> Result<Vec<ProxyGroup>, ControllerError> {
        let api: Api<ProxyGroup> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ControllerError> {
        Ok(self.namespaced::<Service>(namespace).get_opt(name).await?)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ControllerError> {
        Ok(self.namespaced::<ConfigMap>(namespace).get_opt(name).await?)
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ControllerError> {
        let namespace = config_map.namespace().unwrap_or_default();
        debug!("Replacing ConfigMap {}/{}", namespace, config_map.name_any());
        Ok(self
            .namespaced::<ConfigMap>(&namespace)
            .replace(&config_map.name_any(), &PostParams::default(), config_map)
            .await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(self.namespaced::<Secret>(namespace).get_opt(name).await?)
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, ControllerError> {
        let lp = ListParams::default().labels(&label_selector(labels));
        Ok(self.namespaced::<Secret>(namespace).list(&lp).await?.items)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ControllerError> {
        let namespace = secret.namespace().unwrap_or_default();
        Ok(self.namespaced::<Secret>(&namespace).create(&PostParams::default(), secret).await?)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ControllerError> {
        let namespace = secret.namespace().unwrap_or_default();
        Ok(self
            .namespaced::<Secret>(&namespace)
            .replace(&secret.name_any(), &PostParams::default(), secret)
            .await?)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        ignore_not_found(
            self.namespaced::<Secret>(namespace)
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ()),
        )
    }

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>, ControllerError> {
        Ok(self.namespaced::<Role>(namespace).get_opt(name).await?)
    }

    async fn create_role(&self, role: &Role) -> Result<Role, ControllerError> {
        let namespace = role.namespace().unwrap_or_default();
        Ok(self.namespaced::<Role>(&namespace).create(&PostParams::default(), role).await?)
    }

    async fn replace_role(&self, role: &Role) -> Result<Role, ControllerError> {
        let namespace = role.namespace().unwrap_or_default();
        Ok(self
            .namespaced::<Role>(&namespace)
            .replace(&role.name_any(), &PostParams::default(), role)
            .await?)
    }

    async fn delete_role(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        ignore_not_found(
            self.namespaced::<Role>(namespace)
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ()),
        )
    }

    async fn get_role_binding(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>, ControllerError> {
        Ok(self.namespaced::<RoleBinding>(namespace).get_opt(name).await?)
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<RoleBinding, ControllerError> {
        let namespace = binding.namespace().unwrap_or_default();
        Ok(self
            .namespaced::<RoleBinding>(&namespace)
            .create(&PostParams::default(), binding)
            .await?)
    }

    async fn replace_role_binding(&self, binding: &RoleBinding) -> Result<RoleBinding, ControllerError> {
        let namespace = binding.namespace().unwrap_or_default();
        Ok(self
            .namespaced::<RoleBinding>(&namespace)
            .replace(&binding.name_any(), &PostParams::default(), binding)
            .await?)
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        ignore_not_found(
            self.namespaced::<RoleBinding>(namespace)
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ()),
        )
    }

    async fn publish_warning(&self, ingress: &Ingress, reason: &str, note: String) {
        let event = Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &ingress.object_ref(&())).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}
