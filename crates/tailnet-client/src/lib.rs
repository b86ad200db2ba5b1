//! Tailnet API Client
//!
//! A Rust client library for the two tailnet endpoints the HA Ingress
//! controller consumes: the VIP service directory of the coordination API and
//! the local status API of the operator's own node.
//!
//! # Example
//!
//! ```no_run
//! use tailnet_client::{TailnetClient, TailnetClientTrait, VipService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TailnetClient::new(
//!     "https://api.tailscale.com".to_string(),
//!     "tskey-api-xxxx".to_string(),
//!     "-".to_string(),
//!     "http://localhost:41112".to_string(),
//! )?;
//!
//! match client.get_vip_service("svc:my-svc").await {
//!     Ok(svc) => println!("owners annotation: {:?}", svc.annotations),
//!     Err(e) if e.is_not_found() => println!("not created yet"),
//!     Err(e) => return Err(e.into()),
//! }
//!
//! let suffix = client.magic_dns_suffix().await?;
//! println!("tailnet suffix: {}", suffix);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **VIP Services**: get, list, create-or-update and delete directory records
//! - **Local status**: MagicDNS suffix of the current tailnet
//! - **Mocking**: `test-util` feature exposes an in-memory `MockTailnetClient`

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod tailnet_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::TailnetClient;
pub use common::HttpClient;
pub use error::TailnetError;
pub use models::*;
pub use tailnet_trait::TailnetClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockTailnetClient;
