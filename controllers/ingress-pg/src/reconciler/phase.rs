//! Per-Ingress lifecycle.
//!
//! The phase is never persisted. Each reconcile starts from `Unvalidated`
//! and walks the transitions as it observes the world, so the phase it ends
//! in is a pure function of observed state.

use crate::error::ControllerError;
use kube_runtime::controller::Action;
use std::fmt;
use std::time::Duration;

/// Requeue while the ProxyGroup is not ready.
pub const PROXY_GROUP_WAIT: Duration = Duration::from_secs(30);
/// Requeue while waiting for replicas to report serving.
pub const SERVING_WAIT: Duration = Duration::from_secs(10);
/// Periodic resync of a served Ingress.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressPhase {
    Unvalidated,
    /// Invalid until the Ingress changes
    Rejected,
    Reconciling,
    /// Resources provisioned, not yet observed serving; status empty
    Pending,
    /// Serving, status populated
    Ready,
    CleaningUp,
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Validated,
    ValidationFailed,
    /// ProxyGroup missing or not ready; stays `Unvalidated`
    ProxyGroupNotReady,
    ResourcesEnsured,
    ServingObserved,
    DeletionRequested,
    Released,
}

impl fmt::Display for IngressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IngressPhase::Unvalidated => "Unvalidated",
            IngressPhase::Rejected => "Rejected",
            IngressPhase::Reconciling => "Reconciling",
            IngressPhase::Pending => "Pending",
            IngressPhase::Ready => "Ready",
            IngressPhase::CleaningUp => "CleaningUp",
            IngressPhase::Gone => "Gone",
        };
        f.write_str(s)
    }
}

impl IngressPhase {
    /// Apply `event`; transitions not in the lifecycle are invariant violations.
    pub fn on(self, event: PhaseEvent) -> Result<IngressPhase, ControllerError> {
        use IngressPhase::*;
        use PhaseEvent::*;
        let next = match (self, event) {
            (Unvalidated, Validated) => Reconciling,
            (Unvalidated, ValidationFailed) => Rejected,
            (Unvalidated, ProxyGroupNotReady) => Unvalidated,
            (Reconciling, ResourcesEnsured) => Pending,
            (Pending, ServingObserved) => Ready,
            (Gone, DeletionRequested) => Gone,
            (_, DeletionRequested) => CleaningUp,
            (CleaningUp, Released) => Gone,
            (from, event) => {
                return Err(ControllerError::InvariantViolation(format!(
                    "invalid Ingress phase transition from {} on {:?}",
                    from, event
                )))
            }
        };
        Ok(next)
    }

    /// What the controller does after a reconcile that ended in this phase.
    pub fn requeue_action(self) -> Action {
        match self {
            IngressPhase::Unvalidated => Action::requeue(PROXY_GROUP_WAIT),
            IngressPhase::Pending | IngressPhase::Reconciling => Action::requeue(SERVING_WAIT),
            IngressPhase::Ready => Action::requeue(RESYNC_INTERVAL),
            IngressPhase::Rejected | IngressPhase::CleaningUp | IngressPhase::Gone => Action::await_change(),
        }
    }
}
