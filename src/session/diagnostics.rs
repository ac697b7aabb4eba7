//! Injectable diagnostics sink for the session manager.

use std::cell::RefCell;

use super::SessionState;

/// Something worth reporting that never interrupts editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Transition {
        from: SessionState,
        to: SessionState,
    },
    /// Only one of the replicated document and the transport was supplied.
    CollaborationIncomplete { missing: &'static str },
    /// The replicated state exposes no client identity; a random one is used.
    MissingIdentity,
    CollaborationFailed { reason: String },
    ReplicationFailed { reason: String },
    RemoteDeltaRejected { reason: String },
    PresenceFailed { reason: String },
    PasteFallthrough { reason: String },
    TornDown,
}

pub trait Diagnostics {
    fn record(&self, event: SessionEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn record(&self, event: SessionEvent) {
        match event {
            SessionEvent::Transition { from, to } => {
                tracing::debug!(?from, ?to, "session state changed");
            }
            SessionEvent::CollaborationIncomplete { missing } => {
                tracing::debug!(missing, "collaboration not configured");
            }
            SessionEvent::MissingIdentity => {
                tracing::warn!("replicated state has no client identity");
            }
            SessionEvent::CollaborationFailed { reason } => {
                tracing::error!(%reason, "collaboration unavailable, editing locally");
            }
            SessionEvent::ReplicationFailed { reason } => {
                tracing::warn!(%reason, "local change not replicated");
            }
            SessionEvent::RemoteDeltaRejected { reason } => {
                tracing::warn!(%reason, "remote delta rejected");
            }
            SessionEvent::PresenceFailed { reason } => {
                tracing::debug!(%reason, "presence update not sent");
            }
            SessionEvent::PasteFallthrough { reason } => {
                tracing::debug!(%reason, "paste left to host");
            }
            SessionEvent::TornDown => tracing::debug!("session torn down"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    events: RefCell<Vec<SessionEvent>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.borrow().clone()
    }

    pub fn contains(&self, predicate: impl Fn(&SessionEvent) -> bool) -> bool {
        self.events.borrow().iter().any(predicate)
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn record(&self, event: SessionEvent) {
        self.events.borrow_mut().push(event);
    }
}
