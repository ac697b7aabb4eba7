//! Collaboration plumbing: replicated state, transport, presence, and the
//! adapter that binds them to a [`DocumentModel`](crate::model::DocumentModel).

pub mod adapter;
pub mod presence;
pub mod provider;
pub mod replica;
pub mod undo;

pub use adapter::{IncomingSummary, SyncAdapter};
pub use presence::{CaretDecoration, LocalIdentity, PresenceRecord, PresenceTable, default_caret};
pub use provider::{
    LoopbackHub, LoopbackProvider, SharedProvider, SubscriptionId, TransportError,
    TransportProvider, WireMessage,
};
pub use replica::{
    ApplyOutcome, BlockChange, BlockEdit, BlockReplica, CharId, ClientId, Delta, DeltaEvent,
    DeltaObserverId, DeltaOrigin, RemovedRun, ReplicaError, ReplicatedState, SharedBlock,
    SharedReplica, TextPatch, ValidationLimits,
};
pub use undo::UndoManager;
