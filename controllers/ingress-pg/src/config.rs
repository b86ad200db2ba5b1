//! Operator configuration loaded from environment variables.

use crate::error::ControllerError;
use std::time::Duration;

/// Runtime configuration for the controller.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub api_url: String,
    pub api_key: String,
    pub tailnet: String,
    pub local_api_url: String,
    /// Namespace holding serve configs, replica secrets and cert resources
    pub operator_namespace: String,
    /// This operator's owner-reference id on VIP service records
    pub operator_id: String,
    pub default_tags: Vec<String>,
    pub ingress_class: String,
    pub watch_namespace: Option<String>,
    pub reconcile_concurrency: u16,
    pub call_timeout: Duration,
}

impl OperatorConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
                ControllerError::InvalidConfig(format!("{} environment variable is required", key))
            })
        };

        let default_tags: Vec<String> = get("PROXY_TAGS", "tag:k8s")
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if default_tags.is_empty() {
            return Err(ControllerError::InvalidConfig("PROXY_TAGS must name at least one tag".to_string()));
        }

        let reconcile_concurrency = get("RECONCILE_CONCURRENCY", "3")
            .parse::<u16>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ControllerError::InvalidConfig("RECONCILE_CONCURRENCY must be a positive integer".to_string())
            })?;

        let call_timeout_secs = get("CALL_TIMEOUT_SECS", "10")
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ControllerError::InvalidConfig("CALL_TIMEOUT_SECS must be a positive integer".to_string())
            })?;

        Ok(Self {
            api_url: get("TS_API_URL", "https://api.tailscale.com"),
            api_key: required("TS_API_KEY")?,
            tailnet: get("TS_TAILNET", "-"),
            local_api_url: get("TS_LOCALAPI_URL", "http://localhost:41112"),
            operator_namespace: get("OPERATOR_NAMESPACE", "tailscale"),
            operator_id: required("OPERATOR_ID")?,
            default_tags,
            ingress_class: get("INGRESS_CLASS", "tailscale"),
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|v| !v.is_empty()),
            reconcile_concurrency,
            call_timeout: Duration::from_secs(call_timeout_secs),
        })
    }
}
