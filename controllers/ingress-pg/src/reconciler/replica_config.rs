//! Advertised services in each replica's configuration.
//!
//! Every replica config Secret of a ProxyGroup holds one or more versioned
//! `cap-<N>.hujson` documents. Only their `AdvertiseServices` field is
//! managed here, and a document is rewritten only when that field changes.

use super::serve_config::ServeConfig;
use super::Reconciler;
use crate::error::ControllerError;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub const LABEL_PARENT_RESOURCE: &str = "tailscale.com/parent-resource";
pub const LABEL_PARENT_RESOURCE_TYPE: &str = "tailscale.com/parent-resource-type";
pub const LABEL_SECRET_TYPE: &str = "tailscale.com/secret-type";

pub const SECRET_TYPE_CONFIG: &str = "config";
pub const SECRET_TYPE_STATE: &str = "state";

const ADVERTISE_SERVICES: &str = "AdvertiseServices";

/// Labels selecting a ProxyGroup's replica Secrets of `secret_type`.
pub fn pg_secret_labels(proxy_group: &str, secret_type: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_PARENT_RESOURCE.to_string(), proxy_group.to_string()),
        (LABEL_PARENT_RESOURCE_TYPE.to_string(), "proxygroup".to_string()),
        (LABEL_SECRET_TYPE.to_string(), secret_type.to_string()),
    ])
}

/// True for versioned replica config keys (`cap-<N>.hujson`).
pub fn is_replica_config_key(key: &str) -> bool {
    key.strip_prefix("cap-")
        .and_then(|rest| rest.strip_suffix(".hujson"))
        .is_some_and(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
}

/// Rewrite `AdvertiseServices` in a replica config document.
///
/// Returns `None` when the document already advertises exactly `services`.
/// An empty list removes the field.
pub fn with_advertised_services(doc: &[u8], services: &[String]) -> Result<Option<Vec<u8>>, ControllerError> {
    let mut value: Value = if doc.iter().all(u8::is_ascii_whitespace) {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_slice(doc)?
    };
    let Some(obj) = value.as_object_mut() else {
        return Err(ControllerError::InvariantViolation(
            "replica config document is not a JSON object".to_string(),
        ));
    };

    let current = obj.get(ADVERTISE_SERVICES).cloned();
    let desired = (!services.is_empty()).then(|| Value::from(services.to_vec()));
    if current == desired {
        return Ok(None);
    }
    match desired {
        Some(list) => obj.insert(ADVERTISE_SERVICES.to_string(), list),
        None => obj.remove(ADVERTISE_SERVICES),
    };
    Ok(Some(serde_json::to_vec(&value)?))
}

impl Reconciler {
    /// Service Names that replicas should advertise: entries of the serve
    /// config whose certificate is ready, minus `exclude`. Sorted.
    pub(crate) async fn advertised_services(
        &self,
        cfg: &ServeConfig,
        exclude: &BTreeSet<String>,
    ) -> Result<Vec<String>, ControllerError> {
        let mut services = Vec::new();
        for (name, entry) in &cfg.services {
            if exclude.contains(name) {
                continue;
            }
            let Some(fqdn) = entry.fqdn() else {
                continue;
            };
            if self.cert_ready(&fqdn).await? {
                services.push(name.clone());
            } else {
                debug!("Not advertising {} yet, certificate for {} is not ready", name, fqdn);
            }
        }
        Ok(services)
    }

    /// Write `services` into every replica config of the ProxyGroup.
    /// Returns the number of Secrets written.
    pub(crate) async fn propagate_replica_configs(
        &self,
        proxy_group: &str,
        services: &[String],
    ) -> Result<usize, ControllerError> {
        let secrets = self
            .store
            .list_secrets(
                &self.config.operator_namespace,
                &pg_secret_labels(proxy_group, SECRET_TYPE_CONFIG),
            )
            .await?;

        let mut written = 0;
        for secret in secrets {
            let mut updated = secret.clone();
            let mut changed = false;
            if let Some(data) = updated.data.as_mut() {
                for (key, doc) in data.iter_mut() {
                    if !is_replica_config_key(key) {
                        continue;
                    }
                    if let Some(new_doc) = with_advertised_services(&doc.0, services)? {
                        *doc = ByteString(new_doc);
                        changed = true;
                    }
                }
            }
            if changed {
                self.store.replace_secret(&updated).await?;
                info!(
                    "Replica config {} of ProxyGroup {} now advertises {:?}",
                    secret.name_any(),
                    proxy_group,
                    services
                );
                written += 1;
            }
        }
        Ok(written)
    }

    /// Recompute the advertised set from the current serve config and push it
    /// to the replicas.
    pub(crate) async fn sync_replica_configs(
        &self,
        proxy_group: &str,
        exclude: &BTreeSet<String>,
    ) -> Result<usize, ControllerError> {
        let cfg = match self.load_serve_config(proxy_group).await {
            Ok((_, cfg)) => cfg,
            Err(ControllerError::NotFound(_)) => ServeConfig::default(),
            Err(e) => return Err(e),
        };
        let services = self.advertised_services(&cfg, exclude).await?;
        self.propagate_replica_configs(proxy_group, &services).await
    }
}
