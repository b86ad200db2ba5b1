//! ProxyGroup CRD
//!
//! A named, horizontally-scaled set of proxy replicas. The HA Ingress
//! controller only reads ProxyGroups; another controller owns their lifecycle.

use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ProxyGroup type serving Ingress-derived VIP services.
pub const PROXY_GROUP_TYPE_INGRESS: &str = "ingress";

/// ProxyGroup type for egress proxies.
pub const PROXY_GROUP_TYPE_EGRESS: &str = "egress";

/// ProxyGroup type for API server proxies.
pub const PROXY_GROUP_TYPE_KUBE_API_SERVER: &str = "kube-apiserver";

/// Condition type set once all replicas are provisioned.
pub const PROXY_GROUP_READY: &str = "ProxyGroupReady";

/// ProxyGroupSpec defines the desired replica set
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "tailscale.com",
    version = "v1alpha1",
    kind = "ProxyGroup",
    status = "ProxyGroupStatus",
    shortname = "pg"
)]
#[serde(rename_all = "camelCase")]
pub struct ProxyGroupSpec {
    /// Proxy type: "egress", "ingress" or "kube-apiserver".
    ///
    /// Kept as a free string so that unknown types surface as a validation
    /// error on the consumer side instead of a decode failure.
    #[serde(rename = "type")]
    pub proxy_group_type: String,

    /// Number of replicas (defaults to 2 in the owning controller)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Tags applied to the replica devices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Prefix for replica hostnames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname_prefix: Option<String>,
}

/// ProxyGroupStatus defines the observed state of a ProxyGroup
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProxyGroupStatus {
    /// Standard Kubernetes-style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ProxyGroupCondition>,

    /// Replica devices as observed by the owning controller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<TailnetDevice>,
}

/// Mirrors `metav1.Condition`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyGroupCondition {
    /// Condition type, e.g. "ProxyGroupReady"
    #[serde(rename = "type")]
    pub condition_type: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    /// Generation of the ProxyGroup this condition was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the status flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// A replica device on the tailnet.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TailnetDevice {
    /// MagicDNS name of the device
    pub hostname: String,

    /// Tailnet IPs assigned to the device
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tailnet_ips: Vec<String>,
}

impl ProxyGroup {
    /// Returns true when the `ProxyGroupReady` condition is `True` and was
    /// computed for the current generation.
    pub fn is_ready(&self) -> bool {
        let generation = self.meta().generation;
        self.status
            .as_ref()
            .map(|status| {
                status.conditions.iter().any(|c| {
                    c.condition_type == PROXY_GROUP_READY
                        && c.status == "True"
                        && c.observed_generation == generation
                })
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn proxy_group(generation: i64, status: &str, observed: i64) -> ProxyGroup {
        ProxyGroup {
            metadata: ObjectMeta {
                name: Some("test-pg".to_string()),
                generation: Some(generation),
                ..Default::default()
            },
            spec: ProxyGroupSpec {
                proxy_group_type: PROXY_GROUP_TYPE_INGRESS.to_string(),
                ..Default::default()
            },
            status: Some(ProxyGroupStatus {
                conditions: vec![ProxyGroupCondition {
                    condition_type: PROXY_GROUP_READY.to_string(),
                    status: status.to_string(),
                    observed_generation: Some(observed),
                    ..Default::default()
                }],
                devices: vec![],
            }),
        }
    }

    #[test]
    fn test_ready_at_current_generation() {
        assert!(proxy_group(1, "True", 1).is_ready());
    }

    #[test]
    fn test_not_ready_when_condition_false() {
        assert!(!proxy_group(1, "False", 1).is_ready());
    }

    #[test]
    fn test_not_ready_when_condition_stale() {
        // Ready was observed for an older spec
        assert!(!proxy_group(2, "True", 1).is_ready());
    }

    #[test]
    fn test_spec_type_roundtrips_as_type_field() {
        let spec: ProxyGroupSpec = serde_json::from_value(serde_json::json!({"type": "foo"}))
            .expect("spec should deserialize");
        assert_eq!(spec.proxy_group_type, "foo");
    }
}
