//! Document model: the canonical node tree and its transactional mutation.
//!
//! Every mutation goes through [`DocumentModel::commit`]. A transaction is
//! applied to a working copy, validated against the registry, and only then
//! swapped in, so a rejected transaction leaves the tree untouched. Each
//! successful transaction produces a [`ChangeNotification`] with the minimal
//! changed range, returned to the caller and delivered to observers.

pub mod diff;
pub mod history;
pub mod node;
pub mod position;
pub mod transaction;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::DocError;
use crate::registry::Registry;

pub use diff::ChangeRange;
pub use history::History;
pub use node::{Attrs, Mark, MarkKind, Node, NodeKind, RawMark, RawNode};
pub use position::{Position, Selection};
pub use transaction::{Op, Transaction};

/// Who caused a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    /// The local user.
    Local,
    /// Replayed from another participant through the sync adapter.
    Remote,
    /// Undo or redo.
    History,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub origin: Origin,
    pub range: ChangeRange,
    /// Model version after the change.
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&ChangeNotification)>;

pub struct DocumentModel {
    registry: Arc<Registry>,
    root: Node,
    version: u64,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl std::fmt::Debug for DocumentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentModel")
            .field("root", &self.root)
            .field("version", &self.version)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl DocumentModel {
    /// An empty document: one empty paragraph.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            root: Node::doc(vec![Node::paragraph(Vec::new())]),
            version: 0,
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    /// Wraps an existing tree after validating it. Nothing is constructed
    /// when any node fails validation.
    pub fn with_root(registry: Arc<Registry>, root: Node) -> Result<Self, DocError> {
        registry.validate(&root)?;
        let mut model = Self::new(registry);
        model.root = root;
        Ok(model)
    }

    /// Builds a model from the host's raw node format.
    pub fn from_raw(registry: Arc<Registry>, raw: &RawNode) -> Result<Self, DocError> {
        let root = registry.build(raw)?;
        Self::with_root(registry, root)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Applies local ops atomically and returns the new tree.
    pub fn apply_transaction(&mut self, ops: Vec<Op>) -> Result<&Node, DocError> {
        self.commit(Transaction::local(ops))?;
        Ok(&self.root)
    }

    /// Applies a transaction atomically. Returns `None` when it changed
    /// nothing; no notification is emitted in that case.
    pub fn commit(
        &mut self,
        transaction: Transaction,
    ) -> Result<Option<ChangeNotification>, DocError> {
        let next = transaction::apply_ops(&self.registry, &self.root, &transaction.ops)?;
        Ok(self.swap(next, transaction.origin))
    }

    /// Deep snapshot of the current tree.
    pub fn serialize(&self) -> Node {
        self.root.clone()
    }

    /// Replaces the whole tree.
    pub fn restore(
        &mut self,
        root: Node,
        origin: Origin,
    ) -> Result<Option<ChangeNotification>, DocError> {
        self.registry.validate(&root)?;
        Ok(self.swap(root, origin))
    }

    fn swap(&mut self, next: Node, origin: Origin) -> Option<ChangeNotification> {
        let range = diff::diff(&self.root, &next)?;
        self.root = next;
        self.version += 1;
        let notification = ChangeNotification {
            origin,
            range,
            version: self.version,
        };
        for (_, observer) in &mut self.observers {
            observer(&notification);
        }
        Some(notification)
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&ChangeNotification) + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }
}
