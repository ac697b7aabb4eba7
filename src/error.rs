use crate::markdown::TokenizeError;
use crate::sync::{ReplicaError, TransportError};

/// Errors that protect document integrity. They surface to the caller and
/// are never repaired silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocError {
    #[error("structural violation in {op}: {reason}")]
    StructuralViolation { op: String, reason: String },
    #[error("unknown block kind `{0}`")]
    UnknownBlockKind(String),
    #[error("unexpected token: expected {expected}, found {found}")]
    UnexpectedTokenType {
        expected: &'static str,
        found: String,
    },
    #[error("tokenizer failed: {0}")]
    Tokenize(#[from] TokenizeError),
}

impl DocError {
    pub(crate) fn violation(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StructuralViolation {
            op: op.into(),
            reason: reason.into(),
        }
    }

    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Tokenize(_))
    }
}

/// Failures of the collaboration layer. A session absorbs these by falling
/// back to single-user editing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollabError {
    #[error("replicated state does not project to a valid document: {0}")]
    MalformedReplica(String),
    #[error("replica error: {0}")]
    Replica(#[from] ReplicaError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("document error: {0}")]
    Document(#[from] DocError),
    #[error("adapter is out of sync: change touches block {index} of {known}")]
    OutOfSync { index: usize, known: usize },
}
