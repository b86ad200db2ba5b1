//! Shared serve config per ProxyGroup.
//!
//! Every replica of a ProxyGroup reads the same document from ConfigMap
//! `<pg>-ingress-config`. Entries are keyed by Service Name; an entry must
//! exist exactly while some live Ingress resolves to that name.

use super::Reconciler;
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use k8s_openapi::ByteString;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Key of the serve config document in the ConfigMap's binary data.
pub const SERVE_CONFIG_KEY: &str = "serve-config.json";

pub const HTTPS_PORT: u16 = 443;
pub const HTTP_PORT: u16 = 80;

pub fn serve_config_map_name(proxy_group: &str) -> String {
    format!("{}-ingress-config", proxy_group)
}

/// The shared serve config document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ServeConfig {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    /// Fields this controller does not manage
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// Handlers for one Service Name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Keyed by port number. String keys keep the map decodable next to the
    /// flattened fields of `ServeConfig`.
    #[serde(rename = "TCP", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tcp: BTreeMap<String, TcpPortHandler>,

    /// Keyed by `<fqdn>:<port>`
    #[serde(rename = "Web", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub web: BTreeMap<String, WebServerConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TcpPortHandler {
    #[serde(rename = "HTTPS", default, skip_serializing_if = "std::ops::Not::not")]
    pub https: bool,
    #[serde(rename = "HTTP", default, skip_serializing_if = "std::ops::Not::not")]
    pub http: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebServerConfig {
    /// Path -> handler
    #[serde(rename = "Handlers", default)]
    pub handlers: BTreeMap<String, HttpHandler>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpHandler {
    #[serde(rename = "Proxy", default, skip_serializing_if = "String::is_empty")]
    pub proxy: String,
}

impl ServiceConfig {
    /// Entry serving `fqdn` over HTTPS on 443 and, if `http` is set, plain HTTP on 80.
    pub fn for_ingress(fqdn: &str, http: bool, handlers: &BTreeMap<String, HttpHandler>) -> Self {
        let mut cfg = ServiceConfig::default();
        let web = WebServerConfig {
            handlers: handlers.clone(),
        };
        cfg.tcp.insert(HTTPS_PORT.to_string(), TcpPortHandler { https: true, http: false });
        cfg.web.insert(format!("{}:{}", fqdn, HTTPS_PORT), web.clone());
        if http {
            cfg.tcp.insert(HTTP_PORT.to_string(), TcpPortHandler { https: false, http: true });
            cfg.web.insert(format!("{}:{}", fqdn, HTTP_PORT), web);
        }
        cfg
    }

    /// Served FQDN, taken from the first `Web` key.
    pub fn fqdn(&self) -> Option<String> {
        self.web
            .keys()
            .find_map(|k| super::hostname::fqdn_from_host_port(k))
            .map(str::to_string)
    }

    /// Active ports: HTTPS handlers first, then HTTP, each ascending.
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<(bool, u16)> = self
            .tcp
            .iter()
            .filter_map(|(p, h)| p.parse::<u16>().ok().map(|p| (!h.https, p)))
            .collect();
        ports.sort_unstable();
        ports.into_iter().map(|(_, p)| p).collect()
    }
}

/// Decode the document; a missing key is an empty document.
pub fn decode_serve_config(cm: &ConfigMap) -> Result<ServeConfig, ControllerError> {
    match cm.binary_data.as_ref().and_then(|d| d.get(SERVE_CONFIG_KEY)) {
        Some(raw) if !raw.0.is_empty() => Ok(serde_json::from_slice(&raw.0)?),
        _ => Ok(ServeConfig::default()),
    }
}

/// Store `cfg` into a copy of `cm`.
pub fn encode_serve_config(cm: &ConfigMap, cfg: &ServeConfig) -> Result<ConfigMap, ControllerError> {
    let mut updated = cm.clone();
    updated
        .binary_data
        .get_or_insert_with(BTreeMap::new)
        .insert(SERVE_CONFIG_KEY.to_string(), ByteString(serde_json::to_vec(cfg)?));
    Ok(updated)
}

fn backend_url(namespace: &str, service: &str, port: i32, path: &str) -> String {
    format!("http://{}.{}.svc.cluster.local:{}{}", service, namespace, port, path)
}

impl Reconciler {
    /// Read the ProxyGroup's serve config. The ConfigMap is created by the
    /// ProxyGroup controller, so its absence is a NotFound.
    pub(crate) async fn load_serve_config(
        &self,
        proxy_group: &str,
    ) -> Result<(ConfigMap, ServeConfig), ControllerError> {
        let name = serve_config_map_name(proxy_group);
        let cm = self
            .store
            .get_config_map(&self.config.operator_namespace, &name)
            .await?
            .ok_or_else(|| {
                ControllerError::NotFound(format!(
                    "serve config ConfigMap {}/{} for ProxyGroup {}",
                    self.config.operator_namespace, name, proxy_group
                ))
            })?;
        let cfg = decode_serve_config(&cm)?;
        Ok((cm, cfg))
    }

    /// Read-modify-write of the serve config, conditional on the resource
    /// version that was read. Returns whether a write happened.
    async fn update_serve_config<F>(&self, proxy_group: &str, mutate: F) -> Result<bool, ControllerError>
    where
        F: FnOnce(&mut ServeConfig),
    {
        let (cm, cfg) = self.load_serve_config(proxy_group).await?;
        let mut desired = cfg.clone();
        mutate(&mut desired);
        if desired == cfg {
            return Ok(false);
        }
        let updated = encode_serve_config(&cm, &desired)?;
        self.store.replace_config_map(&updated).await?;
        Ok(true)
    }

    /// Make `Services[service]` equal `entry`.
    pub(crate) async fn ensure_serve_entry(
        &self,
        proxy_group: &str,
        service: &str,
        entry: ServiceConfig,
    ) -> Result<bool, ControllerError> {
        let written = self
            .update_serve_config(proxy_group, |cfg| {
                cfg.services.insert(service.to_string(), entry);
            })
            .await?;
        if written {
            info!("Updated serve config of ProxyGroup {} for {}", proxy_group, service);
        } else {
            debug!("Serve config of ProxyGroup {} already up-to-date for {}", proxy_group, service);
        }
        Ok(written)
    }

    /// Drop the entries for `services`.
    pub(crate) async fn remove_serve_entries(
        &self,
        proxy_group: &str,
        services: &BTreeSet<String>,
    ) -> Result<bool, ControllerError> {
        let written = self
            .update_serve_config(proxy_group, |cfg| {
                cfg.services.retain(|name, _| !services.contains(name));
            })
            .await?;
        if written {
            info!("Removed {:?} from serve config of ProxyGroup {}", services, proxy_group);
        }
        Ok(written)
    }

    /// Proxy handlers for the Ingress' backends, keyed by path.
    ///
    /// Rules for a different host are ignored; backends whose port cannot be
    /// resolved are skipped.
    pub(crate) async fn resolve_handlers(
        &self,
        ing: &Ingress,
        host: &str,
    ) -> Result<BTreeMap<String, HttpHandler>, ControllerError> {
        let namespace = ing.namespace().unwrap_or_default();
        let mut routes: Vec<(String, &IngressBackend)> = Vec::new();
        if let Some(spec) = ing.spec.as_ref() {
            if let Some(backend) = spec.default_backend.as_ref() {
                routes.push(("/".to_string(), backend));
            }
            for rule in spec.rules.iter().flatten() {
                if let Some(rule_host) = rule.host.as_deref() {
                    if !rule_host.is_empty() && rule_host != host {
                        warn!(
                            "Ingress {}/{}: rule for host {} does not match TLS host {}, skipping",
                            namespace,
                            ing.name_any(),
                            rule_host,
                            host
                        );
                        continue;
                    }
                }
                for path in rule.http.iter().flat_map(|h| h.paths.iter()) {
                    let p = path.path.clone().filter(|p| !p.is_empty()).unwrap_or_else(|| "/".to_string());
                    routes.push((p, &path.backend));
                }
            }
        }

        let mut handlers = BTreeMap::new();
        for (path, backend) in routes {
            if handlers.contains_key(&path) {
                continue;
            }
            let Some(svc) = backend.service.as_ref() else {
                warn!("Ingress {}/{}: backend for {} is not a Service, skipping", namespace, ing.name_any(), path);
                continue;
            };
            let port = match svc.port.as_ref() {
                Some(p) if p.number.is_some() => p.number,
                Some(p) => match p.name.as_deref() {
                    Some(port_name) => self.named_service_port(&namespace, &svc.name, port_name).await?,
                    None => None,
                },
                None => None,
            };
            let Some(port) = port else {
                warn!(
                    "Ingress {}/{}: could not resolve port of backend Service {}, skipping",
                    namespace,
                    ing.name_any(),
                    svc.name
                );
                continue;
            };
            let target = if path == "/" { String::new() } else { path.clone() };
            handlers.insert(
                path,
                HttpHandler {
                    proxy: backend_url(&namespace, &svc.name, port, &target),
                },
            );
        }
        Ok(handlers)
    }

    async fn named_service_port(
        &self,
        namespace: &str,
        service: &str,
        port_name: &str,
    ) -> Result<Option<i32>, ControllerError> {
        let svc = self.store.get_service(namespace, service).await?;
        Ok(svc
            .and_then(|s| s.spec)
            .and_then(|spec| spec.ports)
            .and_then(|ports| ports.into_iter().find(|p| p.name.as_deref() == Some(port_name)))
            .map(|p| p.port))
    }
}
