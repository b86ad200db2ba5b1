//! In-memory `ClusterStore` for unit tests.
//!
//! Objects carry a monotonically increasing resource version; `replace_*`
//! calls with a stale version fail with a Conflict exactly like the API
//! server, and every successful write bumps `writes()`.

use super::ClusterStore;
use crate::error::ControllerError;
use crds::ProxyGroup;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressStatus};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type Table<K> = BTreeMap<(String, String), K>;

/// A recorded Warning event
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub object: String,
    pub reason: String,
    pub note: String,
}

#[derive(Default)]
struct State {
    ingresses: Table<Ingress>,
    proxy_groups: Table<ProxyGroup>,
    services: Table<Service>,
    config_maps: Table<ConfigMap>,
    secrets: Table<Secret>,
    roles: Table<Role>,
    role_bindings: Table<RoleBinding>,
    events: Vec<RecordedEvent>,
    next_version: u64,
    writes: usize,
    pending_conflicts: usize,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn take_conflict(&mut self, what: &str) -> Result<(), ControllerError> {
        if self.pending_conflicts > 0 {
            self.pending_conflicts -= 1;
            return Err(ControllerError::Conflict(format!("{} was modified concurrently", what)));
        }
        Ok(())
    }
}

fn key_of<K: Resource>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn seed<K: Resource + Clone>(state: &mut State, table: fn(&mut State) -> &mut Table<K>, obj: K) {
    let mut obj = obj;
    obj.meta_mut().resource_version = Some(state.bump());
    table(state).insert(key_of(&obj), obj);
}

fn create<K: Resource + Clone>(
    state: &mut State,
    table: fn(&mut State) -> &mut Table<K>,
    obj: &K,
) -> Result<K, ControllerError> {
    let k = key_of(obj);
    if table(state).contains_key(&k) {
        return Err(ControllerError::Conflict(format!("{}/{} already exists", k.0, k.1)));
    }
    let mut stored = obj.clone();
    stored.meta_mut().resource_version = Some(state.bump());
    state.writes += 1;
    table(state).insert(k, stored.clone());
    Ok(stored)
}

fn replace<K: Resource + Clone>(
    state: &mut State,
    table: fn(&mut State) -> &mut Table<K>,
    obj: &K,
) -> Result<K, ControllerError> {
    let k = key_of(obj);
    state.take_conflict(&k.1)?;
    let current = table(state)
        .get(&k)
        .ok_or_else(|| ControllerError::NotFound(format!("{}/{}", k.0, k.1)))?;
    if current.meta().resource_version != obj.meta().resource_version {
        return Err(ControllerError::Conflict(format!(
            "{}/{}: resource version {:?} is stale",
            k.0,
            k.1,
            obj.meta().resource_version
        )));
    }
    let mut stored = obj.clone();
    stored.meta_mut().resource_version = Some(state.bump());
    state.writes += 1;
    table(state).insert(k, stored.clone());
    Ok(stored)
}

fn delete<K: Resource + Clone>(state: &mut State, table: fn(&mut State) -> &mut Table<K>, namespace: &str, name: &str) {
    if table(state).remove(&key(namespace, name)).is_some() {
        state.writes += 1;
    }
}

/// Shared in-memory object store. Clones see the same objects.
#[derive(Clone, Default)]
pub struct MockClusterStore {
    state: Arc<Mutex<State>>,
}

impl MockClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // Test setup; not counted as writes.

    pub fn add_ingress(&self, ingress: Ingress) {
        seed(&mut self.lock(), |s| &mut s.ingresses, ingress);
    }

    pub fn add_proxy_group(&self, pg: ProxyGroup) {
        seed(&mut self.lock(), |s| &mut s.proxy_groups, pg);
    }

    pub fn add_service(&self, service: Service) {
        seed(&mut self.lock(), |s| &mut s.services, service);
    }

    pub fn add_config_map(&self, config_map: ConfigMap) {
        seed(&mut self.lock(), |s| &mut s.config_maps, config_map);
    }

    pub fn add_secret(&self, secret: Secret) {
        seed(&mut self.lock(), |s| &mut s.secrets, secret);
    }

    /// Mutate a stored Ingress the way a user edit would (new resource version and generation).
    pub fn update_ingress(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Ingress)) {
        let mut state = self.lock();
        let version = state.bump();
        if let Some(ing) = state.ingresses.get_mut(&key(namespace, name)) {
            f(ing);
            ing.metadata.resource_version = Some(version);
            ing.metadata.generation = Some(ing.metadata.generation.unwrap_or(1) + 1);
        }
    }

    /// Mutate a stored Secret out of band (e.g. certificate issuance).
    pub fn update_secret(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Secret)) {
        let mut state = self.lock();
        let version = state.bump();
        if let Some(secret) = state.secrets.get_mut(&key(namespace, name)) {
            f(secret);
            secret.metadata.resource_version = Some(version);
        }
    }

    /// Mutate a stored ProxyGroup out of band.
    pub fn update_proxy_group(&self, name: &str, f: impl FnOnce(&mut ProxyGroup)) {
        let mut state = self.lock();
        let version = state.bump();
        if let Some(pg) = state.proxy_groups.get_mut(&key("", name)) {
            f(pg);
            pg.metadata.resource_version = Some(version);
        }
    }

    /// Delete an Ingress as the API server would: mark it if finalizers remain, otherwise remove it.
    pub fn delete_ingress(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        let version = state.bump();
        let k = key(namespace, name);
        let has_finalizers = state
            .ingresses
            .get(&k)
            .is_some_and(|ing| !ing.finalizers().is_empty());
        if has_finalizers {
            if let Some(ing) = state.ingresses.get_mut(&k) {
                ing.metadata.deletion_timestamp = Some(
                    serde_json::from_value::<Time>(serde_json::json!("2024-01-01T00:00:00Z"))
                        .expect("valid timestamp"),
                );
                ing.metadata.resource_version = Some(version);
            }
        } else {
            state.ingresses.remove(&k);
        }
    }

    /// Make the next `n` replace calls fail with a Conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.lock().pending_conflicts = n;
    }

    /// Number of successful writes since creation
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().events.clone()
    }

    pub fn ingress(&self, namespace: &str, name: &str) -> Option<Ingress> {
        self.lock().ingresses.get(&key(namespace, name)).cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.lock().config_maps.get(&key(namespace, name)).cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.lock().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn role(&self, namespace: &str, name: &str) -> Option<Role> {
        self.lock().roles.get(&key(namespace, name)).cloned()
    }

    pub fn role_binding(&self, namespace: &str, name: &str) -> Option<RoleBinding> {
        self.lock().role_bindings.get(&key(namespace, name)).cloned()
    }
}

#[async_trait::async_trait]
impl ClusterStore for MockClusterStore {
    async fn list_ingresses(&self) -> Result<Vec<Ingress>, ControllerError> {
        Ok(self.lock().ingresses.values().cloned().collect())
    }

    async fn set_ingress_finalizers(
        &self,
        ingress: &Ingress,
        finalizers: Vec<String>,
    ) -> Result<(), ControllerError> {
        let mut state = self.lock();
        let k = key_of(ingress);
        state.take_conflict(&k.1)?;
        let version = state.bump();
        let current = state
            .ingresses
            .get_mut(&k)
            .ok_or_else(|| ControllerError::NotFound(format!("Ingress {}/{}", k.0, k.1)))?;
        if current.metadata.resource_version != ingress.metadata.resource_version {
            return Err(ControllerError::Conflict(format!("Ingress {}/{} was modified", k.0, k.1)));
        }
        current.metadata.finalizers = if finalizers.is_empty() { None } else { Some(finalizers) };
        current.metadata.resource_version = Some(version);
        let gone = current.metadata.deletion_timestamp.is_some() && current.metadata.finalizers.is_none();
        if gone {
            state.ingresses.remove(&k);
        }
        state.writes += 1;
        Ok(())
    }

    async fn patch_ingress_load_balancer(
        &self,
        namespace: &str,
        name: &str,
        ingress: Option<Vec<IngressLoadBalancerIngress>>,
    ) -> Result<(), ControllerError> {
        let mut state = self.lock();
        let version = state.bump();
        let current = state
            .ingresses
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ControllerError::NotFound(format!("Ingress {}/{}", namespace, name)))?;
        current.status = Some(IngressStatus {
            load_balancer: Some(IngressLoadBalancerStatus { ingress }),
        });
        current.metadata.resource_version = Some(version);
        state.writes += 1;
        Ok(())
    }

    async fn get_proxy_group(&self, name: &str) -> Result<Option<ProxyGroup>, ControllerError> {
        Ok(self.lock().proxy_groups.get(&key("", name)).cloned())
    }

    async fn list_proxy_groups(&self) -> Result<Vec<ProxyGroup>, ControllerError> {
        Ok(self.lock().proxy_groups.values().cloned().collect())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ControllerError> {
        Ok(self.lock().services.get(&key(namespace, name)).cloned())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ControllerError> {
        Ok(self.config_map(namespace, name))
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ControllerError> {
        replace(&mut self.lock(), |s| &mut s.config_maps, config_map)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(self.secret(namespace, name))
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Secret>, ControllerError> {
        Ok(self
            .lock()
            .secrets
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s)
            .filter(|s| labels.iter().all(|(k, v)| s.labels().get(k) == Some(v)))
            .cloned()
            .collect())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ControllerError> {
        create(&mut self.lock(), |s| &mut s.secrets, secret)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ControllerError> {
        replace(&mut self.lock(), |s| &mut s.secrets, secret)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        delete(&mut self.lock(), |s| &mut s.secrets, namespace, name);
        Ok(())
    }

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>, ControllerError> {
        Ok(self.role(namespace, name))
    }

    async fn create_role(&self, role: &Role) -> Result<Role, ControllerError> {
        create(&mut self.lock(), |s| &mut s.roles, role)
    }

    async fn replace_role(&self, role: &Role) -> Result<Role, ControllerError> {
        replace(&mut self.lock(), |s| &mut s.roles, role)
    }

    async fn delete_role(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        delete(&mut self.lock(), |s| &mut s.roles, namespace, name);
        Ok(())
    }

    async fn get_role_binding(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>, ControllerError> {
        Ok(self.role_binding(namespace, name))
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<RoleBinding, ControllerError> {
        create(&mut self.lock(), |s| &mut s.role_bindings, binding)
    }

    async fn replace_role_binding(&self, binding: &RoleBinding) -> Result<RoleBinding, ControllerError> {
        replace(&mut self.lock(), |s| &mut s.role_bindings, binding)
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        delete(&mut self.lock(), |s| &mut s.role_bindings, namespace, name);
        Ok(())
    }

    async fn publish_warning(&self, ingress: &Ingress, reason: &str, note: String) {
        let (ns, name) = key_of(ingress);
        self.lock().events.push(RecordedEvent {
            object: format!("{}/{}", ns, name),
            reason: reason.to_string(),
            note,
        });
    }
}
