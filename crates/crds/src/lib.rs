//! ProxyGroup CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed by the HA Ingress controller.

pub mod proxy_group;

pub use proxy_group::*;
