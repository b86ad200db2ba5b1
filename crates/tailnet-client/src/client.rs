//! Tailnet API client
//!
//! Implements the VIP service directory calls against the coordination API
//! (`/api/v2/tailnet/{tailnet}/vip-services/`) and the status query against
//! the operator node's local API (`/localapi/v0/status`).

use crate::common::{check_status, HttpClient};
use crate::error::TailnetError;
use crate::models::*;
use crate::tailnet_trait::TailnetClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Tailnet API client
#[derive(Debug, Clone)]
pub struct TailnetClient {
    http: HttpClient,
    tailnet: String,
    local_url: String,
}

impl TailnetClient {
    /// Create a new tailnet client
    ///
    /// # Arguments
    /// * `base_url` - Coordination API base URL (e.g., "https://api.tailscale.com")
    /// * `token` - API key for authentication
    /// * `tailnet` - Tailnet id used in directory paths ("-" for the key's default tailnet)
    /// * `local_url` - Base URL of the local status API
    pub fn new(
        base_url: String,
        token: String,
        tailnet: String,
        local_url: String,
    ) -> Result<Self, TailnetError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http: HttpClient::new(client, base_url, token),
            tailnet,
            local_url: local_url.trim_end_matches('/').to_string(),
        })
    }

    fn vip_services_path(&self) -> String {
        format!("/api/v2/tailnet/{}/vip-services", urlencoding::encode(&self.tailnet))
    }

    fn vip_service_path(&self, name: &str) -> String {
        format!("{}/{}", self.vip_services_path(), urlencoding::encode(name))
    }

    /// Query the local node status.
    pub async fn local_status(&self) -> Result<LocalStatus, TailnetError> {
        let url = format!("{}/localapi/v0/status", self.local_url);
        debug!("Fetching local status from {}", url);

        let response = self
            .http
            .client()
            .get(&url)
            // The local API rejects requests without this header to block DNS rebinding.
            .header("Sec-Tailscale", "localapi")
            .header("Accept", "application/json")
            .send()
            .await?;

        let response = check_status(response, "GET", "/localapi/v0/status").await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait::async_trait]
impl TailnetClientTrait for TailnetClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Validate the API key by listing VIP services, which requires the
    /// same scope as every other call this client makes.
    async fn validate_token(&self) -> Result<(), TailnetError> {
        debug!("Validating tailnet API key and connectivity");
        let _: VipServiceList = self.http.get(&self.vip_services_path()).await?;
        debug!("API key validated successfully");
        Ok(())
    }

    async fn get_vip_service(&self, name: &str) -> Result<VipService, TailnetError> {
        debug!("Fetching VIP service {}", name);
        self.http
            .get(&self.vip_service_path(name))
            .await
            .map_err(|e| match e {
                TailnetError::NotFound(_) => TailnetError::NotFound(format!("VIP service {} not found", name)),
                other => other,
            })
    }

    async fn list_vip_services(&self) -> Result<Vec<VipService>, TailnetError> {
        let list: VipServiceList = self.http.get(&self.vip_services_path()).await?;
        Ok(list.vip_services)
    }

    async fn create_or_update_vip_service(&self, svc: &VipService) -> Result<(), TailnetError> {
        if svc.name.is_empty() {
            return Err(TailnetError::InvalidRequest("VIP service name must not be empty".to_string()));
        }
        debug!("Writing VIP service {} (ports {:?}, tags {:?})", svc.name, svc.ports, svc.tags);
        self.http.put(&self.vip_service_path(&svc.name), svc).await
    }

    async fn delete_vip_service(&self, name: &str) -> Result<(), TailnetError> {
        debug!("Deleting VIP service {}", name);
        match self.http.delete(&self.vip_service_path(name)).await {
            // Already gone
            Err(TailnetError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn magic_dns_suffix(&self) -> Result<String, TailnetError> {
        let status = self.local_status().await?;
        match status.current_tailnet {
            Some(tailnet) if !tailnet.magic_dns_suffix.is_empty() => Ok(tailnet.magic_dns_suffix),
            _ => Err(TailnetError::NotFound(format!(
                "local node reports no MagicDNS suffix (backend state {:?})",
                status.backend_state
            ))),
        }
    }
}
