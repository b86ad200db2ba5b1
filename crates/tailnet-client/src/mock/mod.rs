//! Mock TailnetClient for unit testing
//!
//! This module provides an in-memory implementation of `TailnetClientTrait`
//! so controller tests can exercise the VIP service directory without a
//! coordination server.

use crate::error::TailnetError;
use crate::models::*;
use crate::tailnet_trait::TailnetClientTrait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock TailnetClient for testing
///
/// Clones share the same backing store, so one instance can stand in for
/// the directory seen by several operators (clusters).
#[derive(Clone)]
pub struct MockTailnetClient {
    pub(crate) base_url: String,
    pub(crate) vip_services: Arc<Mutex<HashMap<String, VipService>>>,
    pub(crate) dns_suffix: Arc<Mutex<String>>,
    pub(crate) writes: Arc<AtomicUsize>,
    pub(crate) unavailable: Arc<AtomicBool>,
}

impl MockTailnetClient {
    /// Create a new mock client reporting `dns_suffix` as the tailnet's MagicDNS suffix
    pub fn new(dns_suffix: impl Into<String>) -> Self {
        Self {
            base_url: "http://mock-tailnet".to_string(),
            vip_services: Arc::new(Mutex::new(HashMap::new())),
            dns_suffix: Arc::new(Mutex::new(dns_suffix.into())),
            writes: Arc::new(AtomicUsize::new(0)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add a VIP service to the mock store (for test setup, not counted as a write)
    pub fn add_vip_service(&self, svc: VipService) {
        self.vip_services.lock().unwrap().insert(svc.name.clone(), svc);
    }

    /// Current record for `name`, if any
    pub fn vip_service(&self, name: &str) -> Option<VipService> {
        self.vip_services.lock().unwrap().get(name).cloned()
    }

    /// Names of all stored records, sorted
    pub fn vip_service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vip_services.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of create/update/delete calls that reached the store
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every call fail with a 503 until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Change the reported MagicDNS suffix
    pub fn set_dns_suffix(&self, suffix: impl Into<String>) {
        *self.dns_suffix.lock().unwrap() = suffix.into();
    }

    fn check_available(&self) -> Result<(), TailnetError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TailnetError::Api {
                status: 503,
                message: "mock directory unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TailnetClientTrait for MockTailnetClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_token(&self) -> Result<(), TailnetError> {
        self.check_available()
    }

    async fn get_vip_service(&self, name: &str) -> Result<VipService, TailnetError> {
        self.check_available()?;
        self.vip_services
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| TailnetError::NotFound(format!("VIP service {} not found", name)))
    }

    async fn list_vip_services(&self) -> Result<Vec<VipService>, TailnetError> {
        self.check_available()?;
        let mut services: Vec<VipService> = self.vip_services.lock().unwrap().values().cloned().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    async fn create_or_update_vip_service(&self, svc: &VipService) -> Result<(), TailnetError> {
        self.check_available()?;
        if svc.name.is_empty() {
            return Err(TailnetError::InvalidRequest("VIP service name must not be empty".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut services = self.vip_services.lock().unwrap();
        // The coordination server owns address allocation.
        let addrs = services
            .get(&svc.name)
            .map(|existing| existing.addrs.clone())
            .unwrap_or_else(|| vec!["100.100.100.1".to_string()]);
        let mut stored = svc.clone();
        stored.addrs = addrs;
        services.insert(svc.name.clone(), stored);
        Ok(())
    }

    async fn delete_vip_service(&self, name: &str) -> Result<(), TailnetError> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.vip_services.lock().unwrap().remove(name);
        Ok(())
    }

    async fn magic_dns_suffix(&self) -> Result<String, TailnetError> {
        self.check_available()?;
        Ok(self.dns_suffix.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_counts_writes_and_shares_state() {
        let client = MockTailnetClient::new("ts.net");
        let other_cluster = client.clone();
        client
            .create_or_update_vip_service(&VipService {
                name: "svc:my-svc".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(other_cluster.write_count(), 1);
        let stored = other_cluster.get_vip_service("svc:my-svc").await.unwrap();
        assert_eq!(stored.addrs, vec!["100.100.100.1".to_string()]);

        other_cluster.delete_vip_service("svc:my-svc").await.unwrap();
        assert!(client.get_vip_service("svc:my-svc").await.unwrap_err().is_not_found());
        assert_eq!(client.write_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_unavailable_is_transient() {
        let client = MockTailnetClient::new("ts.net");
        client.set_unavailable(true);
        let err = client.magic_dns_suffix().await.unwrap_err();
        assert!(err.is_transient());
        client.set_unavailable(false);
        assert_eq!(client.magic_dns_suffix().await.unwrap(), "ts.net");
    }
}
