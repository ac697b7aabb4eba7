//! md-collab: collaborative rich-text document core with markdown interchange.
//!
//! This crate provides the editing core of a block-structured rich-text
//! editor. It includes:
//!
//! - **Document model** - A typed node tree with atomic, validated transactions
//! - **Extension registry** - The closed set of node, mark, and behavior descriptors
//! - **Markdown codec** - Registry-driven parse and render with GFM pipe tables
//! - **Sync adapter** - Binds the model to any replicated state and transport
//! - **Session manager** - Collaboration lifecycle with single-user fallback
//! - **Paste heuristics** - Structured insertion of pasted tables and links
//!
//! # Quick Start
//!
//! ```rust
//! use md_collab::{SessionConfig, SessionManager};
//!
//! let session = SessionManager::default()
//!     .build(SessionConfig::new().with_markdown("# Hello\n\nWorld"))
//!     .unwrap();
//!
//! assert_eq!(session.to_markdown(), "# Hello\n\nWorld");
//! ```

// CRDT primitives for the reference replicated state
pub mod core;

pub mod error;

// Markdown tokenizer, parser, and renderer
pub mod markdown;

// Document tree and transactions
pub mod model;

pub mod paste;

// Extension descriptors
pub mod registry;

// Session lifecycle
pub mod session;

// Replication, transport, and presence
pub mod sync;

pub use core::{LwwRegister, OpId, PeerId, Stamp, StateVector};

pub use error::{CollabError, DocError};

pub use markdown::{CodecConfig, MarkdownCodec, TokenizeError};

pub use model::{
    Attrs, ChangeNotification, ChangeRange, DocumentModel, Mark, MarkKind, Node, NodeKind,
    ObserverId, Op, Origin, Position, RawMark, RawNode, Selection, Transaction,
};

pub use paste::PasteOutcome;

pub use registry::indent::TabDirection;
pub use registry::{ExtensionDescriptor, Registry, compose_collaboration, compose_foundation};

pub use session::{
    Diagnostics, EditorSettings, InitialContent, MemoryDiagnostics, Session, SessionConfig,
    SessionEvent, SessionManager, SessionState, TracingDiagnostics,
};

pub use sync::{
    BlockReplica, CaretDecoration, Delta, LocalIdentity, LoopbackHub, PresenceRecord,
    ReplicatedState, SharedProvider, SharedReplica, TransportProvider, ValidationLimits,
};
