//! TailnetClient trait for mocking
//!
//! This trait abstracts the TailnetClient to enable mocking in unit tests.
//! The concrete TailnetClient implements this trait, and tests can use mock implementations.

use crate::error::TailnetError;
use crate::models::*;

/// Trait for tailnet API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait TailnetClientTrait: Send + Sync {
    /// Get the directory base URL
    fn base_url(&self) -> &str;

    /// Validate the API key
    async fn validate_token(&self) -> Result<(), TailnetError>;

    // VIP service directory
    /// Returns `TailnetError::NotFound` when no record exists for `name`.
    async fn get_vip_service(&self, name: &str) -> Result<VipService, TailnetError>;
    async fn list_vip_services(&self) -> Result<Vec<VipService>, TailnetError>;
    async fn create_or_update_vip_service(&self, svc: &VipService) -> Result<(), TailnetError>;
    async fn delete_vip_service(&self, name: &str) -> Result<(), TailnetError>;

    // Local status
    /// MagicDNS suffix of the tailnet this operator is logged into.
    async fn magic_dns_suffix(&self) -> Result<String, TailnetError>;
}
