//! Tailnet API models
//!
//! These models match the JSON shapes of the coordination API's VIP service
//! endpoints and the local status endpoint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// VIP service directory record
///
/// The record is shared by every operator (cluster) that serves the same
/// service name; ownership is tracked in an annotation by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VipService {
    /// Service name, e.g. "svc:my-svc"
    pub name: String,

    /// Tailnet addresses allocated by the coordination server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addrs: Vec<String>,

    /// Free-form comment shown in the admin console
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,

    /// Arbitrary annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Advertised ports, e.g. "tcp:443"
    #[serde(default)]
    pub ports: Vec<String>,

    /// ACL tags
    #[serde(default)]
    pub tags: Vec<String>,
}

/// List response for VIP services
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VipServiceList {
    /// All VIP services in the tailnet
    #[serde(default)]
    pub vip_services: Vec<VipService>,
}

/// Local node status (subset)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LocalStatus {
    /// Backend state, e.g. "Running"
    #[serde(default)]
    pub backend_state: String,

    /// Tailnet the node is currently logged into
    #[serde(default)]
    pub current_tailnet: Option<CurrentTailnet>,
}

/// Tailnet details reported by the local node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CurrentTailnet {
    /// Tailnet display name
    #[serde(default)]
    pub name: String,

    /// MagicDNS suffix, e.g. "tailnet-xyz.ts.net"
    #[serde(rename = "MagicDNSSuffix", default)]
    pub magic_dns_suffix: String,

    /// Whether MagicDNS is enabled
    #[serde(rename = "MagicDNSEnabled", default)]
    pub magic_dns_enabled: bool,
}
