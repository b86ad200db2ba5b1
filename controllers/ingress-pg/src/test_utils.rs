//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::reconciler::phase::IngressPhase;
use crate::reconciler::replica_config::{pg_secret_labels, SECRET_TYPE_CONFIG, SECRET_TYPE_STATE};
use crate::reconciler::serve_config::{decode_serve_config, serve_config_map_name, ServeConfig, SERVE_CONFIG_KEY};
use crate::reconciler::status::CURRENT_PROFILE_KEY;
use crate::reconciler::validate::ANNOTATION_PROXY_GROUP;
use crate::reconciler::Reconciler;
use crate::store::mock::MockClusterStore;
use crds::*;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::networking::v1::{
    Ingress, IngressBackend, IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::time::Duration;
use tailnet_client::MockTailnetClient;

pub const OPERATOR_NS: &str = "operator-ns";
pub const TEST_NS: &str = "default";
pub const DNS_SUFFIX: &str = "ts.net";
pub const TEST_PG: &str = "test-pg";

/// Parse an RFC 3339 timestamp
pub fn timestamp(rfc3339: &str) -> Time {
    serde_json::from_value(serde_json::json!(rfc3339)).expect("valid timestamp")
}

/// Operator configuration used by reconciler tests
pub fn test_config(operator_id: &str) -> OperatorConfig {
    OperatorConfig {
        api_url: "https://api.example.com".to_string(),
        api_key: "tskey-test".to_string(),
        tailnet: "-".to_string(),
        local_api_url: "http://localhost:41112".to_string(),
        operator_namespace: OPERATOR_NS.to_string(),
        operator_id: operator_id.to_string(),
        default_tags: vec!["tag:k8s".to_string()],
        ingress_class: "tailscale".to_string(),
        watch_namespace: None,
        reconcile_concurrency: 3,
        call_timeout: Duration::from_secs(10),
    }
}

/// Reconciler over shared mock backends
pub fn test_reconciler(store: &MockClusterStore, tailnet: &MockTailnetClient, operator_id: &str) -> Reconciler {
    Reconciler::new(store.clone(), tailnet.clone(), test_config(operator_id))
}

/// Helper to create test Ingress assigned to `proxy_group`
///
/// `host` becomes the single TLS host; the backend is Service `test:8080`.
pub fn create_test_ingress(name: &str, proxy_group: &str, host: Option<&str>, created: &str) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NS.to_string()),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_PROXY_GROUP.to_string(),
                proxy_group.to_string(),
            )])),
            creation_timestamp: Some(timestamp(created)),
            generation: Some(1),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some("tailscale".to_string()),
            default_backend: Some(IngressBackend {
                service: Some(IngressServiceBackend {
                    name: "test".to_string(),
                    port: Some(ServiceBackendPort {
                        number: Some(8080),
                        name: None,
                    }),
                }),
                resource: None,
            }),
            tls: host.map(|h| {
                vec![IngressTLS {
                    hosts: Some(vec![h.to_string()]),
                    secret_name: None,
                }]
            }),
            rules: None,
        }),
        status: None,
    }
}

/// Helper to create test ProxyGroup of type ingress
pub fn create_test_proxy_group(name: &str, ready: bool) -> ProxyGroup {
    ProxyGroup {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: ProxyGroupSpec {
            proxy_group_type: PROXY_GROUP_TYPE_INGRESS.to_string(),
            replicas: Some(2),
            ..Default::default()
        },
        status: Some(ProxyGroupStatus {
            conditions: vec![ProxyGroupCondition {
                condition_type: PROXY_GROUP_READY.to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                observed_generation: Some(1),
                ..Default::default()
            }],
            devices: vec![],
        }),
    }
}

/// Empty serve config as created by the ProxyGroup controller
pub fn serve_config_map(proxy_group: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(serve_config_map_name(proxy_group)),
            namespace: Some(OPERATOR_NS.to_string()),
            ..Default::default()
        },
        binary_data: Some(BTreeMap::from([(
            SERVE_CONFIG_KEY.to_string(),
            ByteString(br#"{"Services":{}}"#.to_vec()),
        )])),
        ..Default::default()
    }
}

pub fn replica_config_secret(proxy_group: &str, index: usize) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}-config", proxy_group, index)),
            namespace: Some(OPERATOR_NS.to_string()),
            labels: Some(pg_secret_labels(proxy_group, SECRET_TYPE_CONFIG)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "cap-106.hujson".to_string(),
            ByteString(br#"{"Version":""}"#.to_vec()),
        )])),
        ..Default::default()
    }
}

/// Replica state Secret whose current profile advertises `services`
pub fn state_secret(proxy_group: &str, index: usize, services: &[&str]) -> Secret {
    let prefs = serde_json::json!({ "AdvertiseServices": services });
    Secret {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", proxy_group, index)),
            namespace: Some(OPERATOR_NS.to_string()),
            labels: Some(pg_secret_labels(proxy_group, SECRET_TYPE_STATE)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (CURRENT_PROFILE_KEY.to_string(), ByteString(b"profile-abc".to_vec())),
            (
                "profile-abc".to_string(),
                ByteString(serde_json::to_vec(&prefs).expect("prefs encode")),
            ),
        ])),
        ..Default::default()
    }
}

/// Ready ProxyGroup with its serve config and `replicas` replica config Secrets
pub fn setup_proxy_group(store: &MockClusterStore, name: &str, replicas: usize) {
    store.add_proxy_group(create_test_proxy_group(name, true));
    store.add_config_map(serve_config_map(name));
    for i in 0..replicas {
        store.add_secret(replica_config_secret(name, i));
    }
}

/// Simulate certificate issuance for `fqdn`
pub fn populate_cert(store: &MockClusterStore, fqdn: &str) {
    store.update_secret(OPERATOR_NS, fqdn, |s| {
        let data = s.data.get_or_insert_with(BTreeMap::new);
        data.insert("tls.crt".to_string(), ByteString(b"fake-cert".to_vec()));
        data.insert("tls.key".to_string(), ByteString(b"fake-key".to_vec()));
    });
}

/// Reconcile the current stored version of Ingress `name`
pub async fn converge(
    reconciler: &Reconciler,
    store: &MockClusterStore,
    name: &str,
) -> Result<IngressPhase, ControllerError> {
    let ing = store.ingress(TEST_NS, name).expect("ingress should exist");
    reconciler.converge(&ing).await
}

pub fn stored_serve_config(store: &MockClusterStore, proxy_group: &str) -> ServeConfig {
    let cm = store
        .config_map(OPERATOR_NS, &serve_config_map_name(proxy_group))
        .expect("serve config should exist");
    decode_serve_config(&cm).expect("serve config should decode")
}

/// `AdvertiseServices` of replica `index`
pub fn advertised_services(store: &MockClusterStore, proxy_group: &str, index: usize) -> Vec<String> {
    let secret = store
        .secret(OPERATOR_NS, &format!("{}-{}-config", proxy_group, index))
        .expect("replica config should exist");
    let doc = secret
        .data
        .as_ref()
        .and_then(|d| d.get("cap-106.hujson"))
        .expect("config document should exist");
    let value: serde_json::Value = serde_json::from_slice(&doc.0).expect("config should decode");
    value
        .get("AdvertiseServices")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Ports in the Ingress' load balancer status
pub fn status_ports(store: &MockClusterStore, name: &str) -> Vec<i32> {
    store
        .ingress(TEST_NS, name)
        .and_then(|i| i.status)
        .and_then(|s| s.load_balancer)
        .and_then(|lb| lb.ingress)
        .unwrap_or_default()
        .iter()
        .flat_map(|lb| lb.ports.iter().flatten().map(|p| p.port))
        .collect()
}
