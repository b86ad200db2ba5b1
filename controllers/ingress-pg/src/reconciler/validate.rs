//! Ingress validation and liveness.
//!
//! `validate_ingress` is pure and re-run on every reconcile. `LiveSet`
//! applies the same rules to every Ingress of the class to decide which
//! Service Names are still referenced. Hostnames are unique cluster-wide, so
//! a Service Name is live on at most one ProxyGroup.

use super::hostname;
use crds::{ProxyGroup, PROXY_GROUP_TYPE_INGRESS};
use k8s_openapi::api::networking::v1::{Ingress, IngressTLS};
use kube::ResourceExt;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Selects the ProxyGroup an Ingress is served by.
pub const ANNOTATION_PROXY_GROUP: &str = "tailscale.com/proxy-group";
/// Comma separated tag override for the VIP service.
pub const ANNOTATION_TAGS: &str = "tailscale.com/tags";
/// `enabled` additionally serves plain HTTP on port 80.
pub const ANNOTATION_HTTP_ENDPOINT: &str = "tailscale.com/http-endpoint";

/// What an Ingress asks for, once its shape has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressIntent {
    pub namespace: String,
    pub name: String,
    pub proxy_group: String,
    /// TLS host, or `<namespace>-<name>` when the Ingress has no TLS block
    pub host: String,
    /// Tags from the annotation; `None` means the operator defaults
    pub tags: Option<Vec<String>>,
    pub http_endpoint: bool,
}

impl IngressIntent {
    pub fn service_name(&self) -> String {
        hostname::service_name(&self.host)
    }
}

/// Why an Ingress cannot be served right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The ProxyGroup is missing, of the wrong type or not ready. Nothing is
    /// mutated until this clears.
    ProxyGroup(String),
    /// The Ingress itself is invalid and is treated as not live.
    Ingress(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ProxyGroup(msg) | ValidationError::Ingress(msg) => f.write_str(msg),
        }
    }
}

/// Name of the ProxyGroup `ing` is assigned to, if it is ours to handle.
pub fn target_proxy_group<'a>(ing: &'a Ingress, ingress_class: &str) -> Option<&'a str> {
    let class = ing.spec.as_ref().and_then(|s| s.ingress_class_name.as_deref());
    if class != Some(ingress_class) {
        return None;
    }
    ing.annotations()
        .get(ANNOTATION_PROXY_GROUP)
        .map(String::as_str)
        .filter(|pg| !pg.is_empty())
}

/// Check a single ACL tag.
pub fn check_tag(tag: &str) -> Result<(), &'static str> {
    let Some(name) = tag.strip_prefix("tag:") else {
        return Err("tag names must start with 'tag:'");
    };
    let Some(first) = name.chars().next() else {
        return Err("tag names must not be empty");
    };
    if !first.is_ascii_alphabetic() {
        return Err("tag names must start with a letter, after 'tag:'");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("tag names can only contain numbers, letters, or dashes");
    }
    Ok(())
}

fn format_tls(tls: &[IngressTLS]) -> String {
    let entries: Vec<String> = tls
        .iter()
        .map(|t| {
            format!(
                "{{[{}] {}}}",
                t.hosts.as_deref().unwrap_or_default().join(" "),
                t.secret_name.as_deref().unwrap_or_default()
            )
        })
        .collect();
    format!("[{}]", entries.join(" "))
}

/// Derive the intent of `ing` for ProxyGroup `proxy_group`: tags are checked
/// first, then the TLS block.
pub fn parse_intent(ing: &Ingress, proxy_group: &str) -> Result<IngressIntent, String> {
    let namespace = ing.namespace().unwrap_or_default();
    let name = ing.name_any();

    let tags = match ing.annotations().get(ANNOTATION_TAGS) {
        Some(raw) => {
            let tags: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            for tag in &tags {
                check_tag(tag).map_err(|reason| {
                    format!("{} annotation contains invalid tag {:?}: {}", ANNOTATION_TAGS, tag, reason)
                })?;
            }
            (!tags.is_empty()).then_some(tags)
        }
        None => None,
    };

    let tls = ing
        .spec
        .as_ref()
        .and_then(|s| s.tls.as_deref())
        .unwrap_or_default();
    if tls.len() > 1 || tls.first().is_some_and(|t| t.hosts.as_ref().is_some_and(|h| h.len() > 1)) {
        return Err(format!(
            "Ingress contains invalid TLS block {}: only a single TLS entry with a single host is allowed",
            format_tls(tls)
        ));
    }
    let host = tls
        .first()
        .and_then(|t| t.hosts.as_ref())
        .and_then(|h| h.first())
        .filter(|h| !h.is_empty())
        .cloned()
        .unwrap_or_else(|| format!("{}-{}", namespace, name));

    let http_endpoint = ing
        .annotations()
        .get(ANNOTATION_HTTP_ENDPOINT)
        .is_some_and(|v| v == "enabled");

    Ok(IngressIntent {
        namespace,
        name,
        proxy_group: proxy_group.to_string(),
        host,
        tags,
        http_endpoint,
    })
}

/// ProxyGroup-level checks: exists, is an ingress ProxyGroup, is ready.
pub fn validate_proxy_group(name: &str, pg: Option<&ProxyGroup>) -> Result<(), ValidationError> {
    let Some(pg) = pg else {
        return Err(ValidationError::ProxyGroup(format!("ProxyGroup \"{}\" does not exist", name)));
    };
    if pg.spec.proxy_group_type != PROXY_GROUP_TYPE_INGRESS {
        return Err(ValidationError::ProxyGroup(format!(
            "ProxyGroup \"{}\" is of type \"{}\" but must be of type \"{}\"",
            name, pg.spec.proxy_group_type, PROXY_GROUP_TYPE_INGRESS
        )));
    }
    if !pg.is_ready() {
        return Err(ValidationError::ProxyGroup(format!("ProxyGroup \"{}\" is not ready", name)));
    }
    Ok(())
}

/// Earlier-created Ingresses win hostname collisions; ties go to namespace/name order.
pub fn creation_order(a: &Ingress, b: &Ingress) -> Ordering {
    let ta = a.metadata.creation_timestamp.as_ref().map(|t| &t.0);
    let tb = b.metadata.creation_timestamp.as_ref().map(|t| &t.0);
    let by_time = match (ta, tb) {
        (Some(ta), Some(tb)) => ta.cmp(tb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time
        .then_with(|| a.namespace().cmp(&b.namespace()))
        .then_with(|| a.name_any().cmp(&b.name_any()))
}

fn same_object(a: &Ingress, b: &Ingress) -> bool {
    a.namespace() == b.namespace() && a.name_any() == b.name_any()
}

/// An Ingress that could claim a Service Name: assigned to a ProxyGroup,
/// not deleting and well formed.
fn candidate(ing: &Ingress) -> Option<IngressIntent> {
    if ing.metadata.deletion_timestamp.is_some() {
        return None;
    }
    let proxy_group = ing
        .annotations()
        .get(ANNOTATION_PROXY_GROUP)
        .filter(|pg| !pg.is_empty())?;
    parse_intent(ing, proxy_group).ok()
}

/// Validate `ing` against its ProxyGroup and every other Ingress of the class,
/// whichever ProxyGroup they are assigned to.
///
/// Checks run in order and the first failure wins: ProxyGroup, tags, TLS,
/// duplicate hostname.
pub fn validate_ingress(
    ing: &Ingress,
    proxy_group: &str,
    pg: Option<&ProxyGroup>,
    ingresses: &[Ingress],
) -> Result<IngressIntent, ValidationError> {
    validate_proxy_group(proxy_group, pg)?;
    let intent = parse_intent(ing, proxy_group).map_err(ValidationError::Ingress)?;

    let service = intent.service_name();
    let earlier = ingresses
        .iter()
        .filter(|s| !same_object(s, ing))
        .filter(|s| creation_order(s, ing) == Ordering::Less)
        .filter_map(|s| candidate(s).map(|i| (s, i)))
        .find(|(_, i)| i.service_name() == service);
    if let Some((found, _)) = earlier {
        return Err(ValidationError::Ingress(format!(
            "found duplicate Ingress \"{}\" for hostname \"{}\" - multiple Ingresses for the same hostname in the same cluster are not allowed",
            found.name_any(),
            intent.host
        )));
    }
    Ok(intent)
}

/// Service Names that still have a live Ingress, on one ProxyGroup or on all of them.
#[derive(Debug, Clone, Default)]
pub struct LiveSet {
    services: BTreeMap<String, LiveService>,
}

/// The Ingress that owns a live Service Name.
#[derive(Debug, Clone)]
pub struct LiveService {
    pub intent: IngressIntent,
    pub fqdn: String,
}

impl LiveSet {
    /// Live Service Names across the cluster. `ingresses` are the Ingresses
    /// of the class; each name goes to the earliest well-formed claim.
    pub fn cluster(ingresses: &[Ingress], dns_suffix: &str) -> Self {
        let mut sorted: Vec<&Ingress> = ingresses.iter().collect();
        sorted.sort_by(|a, b| creation_order(a, b));

        let mut services = BTreeMap::new();
        for ing in sorted {
            let Some(intent) = candidate(ing) else {
                continue;
            };
            let fqdn = hostname::fqdn(&intent.host, dns_suffix);
            services
                .entry(intent.service_name())
                .or_insert(LiveService { intent, fqdn });
        }
        Self { services }
    }

    /// The subset served by `proxy_group`.
    pub fn on_proxy_group(&self, proxy_group: &str) -> Self {
        let services = self
            .services
            .iter()
            .filter(|(_, s)| s.intent.proxy_group == proxy_group)
            .map(|(name, s)| (name.clone(), s.clone()))
            .collect();
        Self { services }
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// True if any live Ingress is served under `fqdn`.
    pub fn references_fqdn(&self, fqdn: &str) -> bool {
        self.services.values().any(|s| s.fqdn == fqdn)
    }
}
