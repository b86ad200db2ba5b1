//! Controller-specific error types.
//!
//! Every failure the reconciler can hit is folded into `ControllerError`;
//! `ControllerError::class` decides how the watcher requeues it.

use kube::Error as KubeError;
use tailnet_client::TailnetError;
use thiserror::Error;

/// Errors that can occur in the HA Ingress controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Tailnet directory or local API error
    #[error("Tailnet error: {0}")]
    Tailnet(#[from] TailnetError),

    /// JSON document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ingress configuration rejected; permanent until the Ingress changes
    #[error("Invalid Ingress configuration: {0}")]
    Validation(String),

    /// An expected object does not exist yet
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency write lost to another writer
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend unavailable or call timed out
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// A shared resource was about to be released while still referenced
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

/// Retry class of a `ControllerError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Not retried for the same generation
    Validation,
    /// Retried with backoff, never surfaced
    NotFound,
    /// Retried immediately
    Conflict,
    /// Retried with backoff, warned about when persistent
    Transient,
    /// Logged as an error on every occurrence
    Invariant,
}

impl ControllerError {
    /// Classify the error for the requeue policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            ControllerError::Kube(KubeError::Api(ae)) => match ae.code {
                404 => ErrorClass::NotFound,
                409 => ErrorClass::Conflict,
                422 | 400 => ErrorClass::Validation,
                _ => ErrorClass::Transient,
            },
            ControllerError::Kube(_) => ErrorClass::Transient,
            ControllerError::Tailnet(e) if e.is_not_found() => ErrorClass::NotFound,
            ControllerError::Tailnet(TailnetError::InvalidRequest(_)) => ErrorClass::Validation,
            ControllerError::Tailnet(_) => ErrorClass::Transient,
            ControllerError::Serialization(_) => ErrorClass::Invariant,
            ControllerError::Validation(_) | ControllerError::InvalidConfig(_) => ErrorClass::Validation,
            ControllerError::NotFound(_) => ErrorClass::NotFound,
            ControllerError::Conflict(_) => ErrorClass::Conflict,
            ControllerError::Transient(_) | ControllerError::Watch(_) => ErrorClass::Transient,
            ControllerError::InvariantViolation(_) => ErrorClass::Invariant,
        }
    }

    /// True for an optimistic concurrency loss.
    pub fn is_conflict(&self) -> bool {
        self.class() == ErrorClass::Conflict
    }
}
