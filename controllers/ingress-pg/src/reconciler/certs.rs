//! TLS certificate Secret plus the Role and RoleBinding that let a
//! ProxyGroup's replicas read it.
//!
//! All three objects are named after the served FQDN and live in the operator
//! namespace. The Secret is created empty; it is populated by the replicas
//! once a certificate has been issued.

use super::validate::LiveSet;
use super::Reconciler;
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use tracing::{debug, error, info};

pub const LABEL_MANAGED: &str = "tailscale.com/managed";
pub const LABEL_PROXY_GROUP: &str = "tailscale.com/proxy-group";
pub const LABEL_DOMAIN: &str = "tailscale.com/domain";

const TLS_CERT_KEY: &str = "tls.crt";
const TLS_KEY_KEY: &str = "tls.key";

/// Labels shared by a hostname's Secret, Role and RoleBinding.
pub fn cert_resource_labels(proxy_group: &str, fqdn: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_PROXY_GROUP.to_string(), proxy_group.to_string()),
        (LABEL_DOMAIN.to_string(), fqdn.to_string()),
    ])
}

fn meta(namespace: &str, name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// Empty `kubernetes.io/tls` Secret for `fqdn`.
pub fn cert_secret(namespace: &str, proxy_group: &str, fqdn: &str) -> Secret {
    let mut labels = cert_resource_labels(proxy_group, fqdn);
    labels.insert(
        super::replica_config::LABEL_SECRET_TYPE.to_string(),
        "certs".to_string(),
    );
    Secret {
        metadata: meta(namespace, fqdn, labels),
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(BTreeMap::from([
            (TLS_CERT_KEY.to_string(), ByteString(Vec::new())),
            (TLS_KEY_KEY.to_string(), ByteString(Vec::new())),
        ])),
        ..Default::default()
    }
}

/// Role granting read access to the one Secret named `fqdn`.
pub fn cert_role(namespace: &str, proxy_group: &str, fqdn: &str) -> Role {
    Role {
        metadata: meta(namespace, fqdn, cert_resource_labels(proxy_group, fqdn)),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["secrets".to_string()]),
            resource_names: Some(vec![fqdn.to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }]),
    }
}

/// Binds `cert_role` to the ProxyGroup's ServiceAccount.
pub fn cert_role_binding(namespace: &str, proxy_group: &str, fqdn: &str) -> RoleBinding {
    RoleBinding {
        metadata: meta(namespace, fqdn, cert_resource_labels(proxy_group, fqdn)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: fqdn.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: proxy_group.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// A certificate is ready once both halves have been written.
pub fn cert_is_ready(secret: &Secret) -> bool {
    let non_empty = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .is_some_and(|v| !v.0.is_empty())
    };
    non_empty(TLS_CERT_KEY) && non_empty(TLS_KEY_KEY)
}

fn labels_match(current: Option<&BTreeMap<String, String>>, desired: Option<&BTreeMap<String, String>>) -> bool {
    match (current, desired) {
        (_, None) => true,
        (None, Some(d)) => d.is_empty(),
        (Some(c), Some(d)) => d.iter().all(|(k, v)| c.get(k) == Some(v)),
    }
}

fn merged_labels(current: Option<&BTreeMap<String, String>>, desired: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    let mut labels = current.cloned().unwrap_or_default();
    labels.extend(desired.cloned().unwrap_or_default());
    labels
}

impl Reconciler {
    /// Whether the certificate Secret for `fqdn` is populated.
    pub(crate) async fn cert_ready(&self, fqdn: &str) -> Result<bool, ControllerError> {
        Ok(self
            .store
            .get_secret(&self.config.operator_namespace, fqdn)
            .await?
            .is_some_and(|s| cert_is_ready(&s)))
    }

    /// Create the Secret, Role and RoleBinding for `fqdn` if missing; repair
    /// labels, rules and subjects if they drifted. Returns the number of writes.
    pub(crate) async fn ensure_cert_resources(&self, proxy_group: &str, fqdn: &str) -> Result<usize, ControllerError> {
        let ns = &self.config.operator_namespace;
        let mut writes = 0;

        let desired = cert_secret(ns, proxy_group, fqdn);
        match self.store.get_secret(ns, fqdn).await? {
            None => {
                self.store.create_secret(&desired).await?;
                info!("Created certificate Secret {}/{}", ns, fqdn);
                writes += 1;
            }
            Some(current) if !labels_match(current.metadata.labels.as_ref(), desired.metadata.labels.as_ref()) => {
                let mut updated = current.clone();
                updated.metadata.labels = Some(merged_labels(
                    current.metadata.labels.as_ref(),
                    desired.metadata.labels.as_ref(),
                ));
                self.store.replace_secret(&updated).await?;
                info!("Updated labels of certificate Secret {}/{}", ns, fqdn);
                writes += 1;
            }
            Some(_) => debug!("Certificate Secret {}/{} already exists", ns, fqdn),
        }

        let desired = cert_role(ns, proxy_group, fqdn);
        match self.store.get_role(ns, fqdn).await? {
            None => {
                self.store.create_role(&desired).await?;
                info!("Created Role {}/{}", ns, fqdn);
                writes += 1;
            }
            Some(current)
                if current.rules != desired.rules
                    || !labels_match(current.metadata.labels.as_ref(), desired.metadata.labels.as_ref()) =>
            {
                let mut updated = current.clone();
                updated.rules = desired.rules.clone();
                updated.metadata.labels = Some(merged_labels(
                    current.metadata.labels.as_ref(),
                    desired.metadata.labels.as_ref(),
                ));
                self.store.replace_role(&updated).await?;
                info!("Updated Role {}/{}", ns, fqdn);
                writes += 1;
            }
            Some(_) => debug!("Role {}/{} already up-to-date", ns, fqdn),
        }

        let desired = cert_role_binding(ns, proxy_group, fqdn);
        match self.store.get_role_binding(ns, fqdn).await? {
            None => {
                self.store.create_role_binding(&desired).await?;
                info!("Created RoleBinding {}/{}", ns, fqdn);
                writes += 1;
            }
            Some(current)
                if current.subjects != desired.subjects
                    || current.role_ref != desired.role_ref
                    || !labels_match(current.metadata.labels.as_ref(), desired.metadata.labels.as_ref()) =>
            {
                // roleRef is immutable; a drifted one has to be recreated.
                if current.role_ref != desired.role_ref {
                    self.store.delete_role_binding(ns, fqdn).await?;
                    self.store.create_role_binding(&desired).await?;
                } else {
                    let mut updated = current.clone();
                    updated.subjects = desired.subjects.clone();
                    updated.metadata.labels = Some(merged_labels(
                        current.metadata.labels.as_ref(),
                        desired.metadata.labels.as_ref(),
                    ));
                    self.store.replace_role_binding(&updated).await?;
                }
                info!("Updated RoleBinding {}/{}", ns, fqdn);
                writes += 1;
            }
            Some(_) => debug!("RoleBinding {}/{} already up-to-date", ns, fqdn),
        }

        Ok(writes)
    }

    /// Delete the Secret, Role and RoleBinding for `fqdn`.
    ///
    /// `cluster` holds the live Ingresses of every ProxyGroup; the resources
    /// are shared by name, so release is refused while any of them is still
    /// served under `fqdn`.
    pub(crate) async fn release_cert_resources(
        &self,
        proxy_group: &str,
        fqdn: &str,
        live: &LiveSet,
    ) -> Result<(), ControllerError> {
        if live.references_fqdn(fqdn) {
            let msg = format!(
                "refusing to release certificate resources for {} from ProxyGroup {}: still referenced by a live Ingress",
                fqdn, proxy_group
            );
            error!("{}", msg);
            return Err(ControllerError::InvariantViolation(msg));
        }
        let ns = &self.config.operator_namespace;
        self.store.delete_role_binding(ns, fqdn).await?;
        self.store.delete_role(ns, fqdn).await?;
        self.store.delete_secret(ns, fqdn).await?;
        info!("Released certificate resources for {} on ProxyGroup {}", fqdn, proxy_group);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_is_scoped_to_one_secret() {
        let role = cert_role("operator-ns", "test-pg", "my-svc.ts.net");
        let rules = role.rules.expect("rules");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].resource_names, Some(vec!["my-svc.ts.net".to_string()]));
        assert_eq!(rules[0].verbs, vec!["get", "list", "watch"]);
    }

    #[test]
    fn test_binding_targets_proxy_group_service_account() {
        let binding = cert_role_binding("operator-ns", "test-pg", "my-svc.ts.net");
        let subjects = binding.subjects.expect("subjects");
        assert_eq!(subjects[0].name, "test-pg");
        assert_eq!(subjects[0].namespace.as_deref(), Some("operator-ns"));
        assert_eq!(binding.role_ref.name, "my-svc.ts.net");
    }

    #[test]
    fn test_new_secret_is_not_ready() {
        let mut secret = cert_secret("operator-ns", "test-pg", "my-svc.ts.net");
        assert!(!cert_is_ready(&secret));
        assert_eq!(
            secret.metadata.labels.as_ref().and_then(|l| l.get("tailscale.com/secret-type")).map(String::as_str),
            Some("certs")
        );
        if let Some(data) = secret.data.as_mut() {
            data.insert(TLS_CERT_KEY.to_string(), ByteString(b"cert".to_vec()));
            data.insert(TLS_KEY_KEY.to_string(), ByteString(b"key".to_vec()));
        }
        assert!(cert_is_ready(&secret));
    }

    #[test]
    fn test_labels_match_ignores_extra_labels() {
        let desired = cert_resource_labels("test-pg", "my-svc.ts.net");
        let mut current = desired.clone();
        current.insert("other".to_string(), "x".to_string());
        assert!(labels_match(Some(&current), Some(&desired)));
        current.insert(LABEL_PROXY_GROUP.to_string(), "other-pg".to_string());
        assert!(!labels_match(Some(&current), Some(&desired)));
    }
}
