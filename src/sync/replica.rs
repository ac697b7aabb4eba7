//! Replicated state contract and the reference block replica.
//!
//! The adapter only talks to [`ReplicatedState`]: an apply-delta /
//! observe-delta pair, a block projection, and an optional client identity.
//! [`BlockReplica`] implements it as an RGA sequence of top-level blocks.
//! A block's shell (kind and attributes) is a last-writer-wins value; the
//! inline content of paragraphs, headings and code blocks is a second RGA
//! sequence of grapheme atoms, so concurrent typing in one block merges.
//! Container blocks (lists, quotes, tables) are replaced as a whole.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use unicode_segmentation::UnicodeSegmentation;

use crate::core::{LwwRegister, OpId, PeerId, Sequence, Stamp, StateVector};
use crate::model::node::{Node, NodeKind};
use crate::model::position::{normalize_inline, plain_inline};

pub type ClientId = PeerId;

/// Opaque encoded batch of replica operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delta(Vec<u8>);

impl Delta {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicaError {
    #[error("malformed delta: {0}")]
    Malformed(String),
    #[error("resource limit exceeded: {actual} > {limit}")]
    ResourceLimitExceeded { limit: usize, actual: usize },
    #[error("unknown block {0:?}")]
    UnknownBlock(OpId),
    #[error("unknown text position {0:?}")]
    UnknownPosition(CharId),
}

/// Limits applied to incoming deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    pub max_ops_per_delta: usize,
    pub max_payload_bytes: usize,
    pub max_pending: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_ops_per_delta: 10_000,
            max_payload_bytes: 10 * 1024 * 1024, // 10 MB
            max_pending: 100_000,
        }
    }
}

/// Identity of one inline atom: the op that inserted it and its index in
/// that op's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CharId {
    pub op: OpId,
    pub index: u32,
}

/// One visible top-level block of the projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedBlock {
    /// Stable identity: the id of the op that inserted the block.
    pub key: OpId,
    /// Id of the op that wrote the current shell.
    pub version: OpId,
    pub node: Node,
    /// Peers whose writes are visible in the block.
    pub writers: BTreeSet<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockEdit {
    /// Inserts `nodes` in order right after `after` (`None`: at the start).
    Insert { after: Option<OpId>, nodes: Vec<Node> },
    /// Brings the block to `node`, merging at the text level when both
    /// sides are textblocks.
    Update { key: OpId, node: Node },
    /// Replaces kind and attributes; inline content is kept.
    Reshape { key: OpId, node: Node },
    InsertText {
        key: OpId,
        after: Option<CharId>,
        content: Vec<Node>,
    },
    DeleteText { key: OpId, atoms: Vec<CharId> },
    Delete { key: OpId },
}

/// Text removed by one edit, grouped into runs that were adjacent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedRun {
    /// Last atom of the run; restoring inserts right after it.
    pub last: CharId,
    pub content: Vec<Node>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextPatch {
    pub inserted: Vec<CharId>,
    pub removed: Vec<RemovedRun>,
}

impl TextPatch {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// What one local edit wrote, enough to invert it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockChange {
    Inserted {
        key: OpId,
        /// Atoms created with the block.
        text: Vec<CharId>,
    },
    Reshaped {
        key: OpId,
        before: Node,
        version: OpId,
    },
    Retyped {
        key: OpId,
        patch: TextPatch,
    },
    Deleted {
        key: OpId,
        before: Node,
        /// Block that preceded the deleted one.
        anchor: Option<OpId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaEvent {
    pub origin: DeltaOrigin,
    pub delta: Delta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Operations that were applied.
    pub applied: Vec<OpId>,
    /// Operations waiting for causal dependencies.
    pub buffered: Vec<OpId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeltaObserverId(u64);

pub type DeltaObserver = Box<dyn FnMut(&DeltaEvent)>;

/// Capability surface the sync adapter needs from a conflict-free engine.
pub trait ReplicatedState {
    /// Stable per-process identity, when the engine exposes one.
    fn client_id(&self) -> Option<ClientId>;

    /// Visible top-level blocks in document order.
    fn blocks(&self) -> Vec<SharedBlock>;

    /// Applies local edits and reports what they changed. References are
    /// resolved against the state before the batch; a failing batch writes
    /// nothing.
    fn edit(&mut self, edits: Vec<BlockEdit>) -> Result<Vec<BlockChange>, ReplicaError>;

    fn apply_delta(&mut self, delta: &Delta) -> Result<ApplyOutcome, ReplicaError>;

    fn observe_delta(&mut self, observer: DeltaObserver) -> DeltaObserverId;

    fn unobserve_delta(&mut self, id: DeltaObserverId) -> bool;

    fn state_vector(&self) -> StateVector;

    /// Everything a peer at `since` is missing. Empty when nothing is.
    fn delta_since(&self, since: &StateVector) -> Delta;
}

/// Handle shared between the host (which owns the replica's lifetime) and
/// the sync adapter.
pub type SharedReplica = Rc<RefCell<dyn ReplicatedState>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum OpKind {
    Insert {
        after: Option<OpId>,
        node: Node,
    },
    Reshape {
        target: OpId,
        node: Node,
    },
    Delete {
        target: OpId,
    },
    InsertText {
        target: OpId,
        after: Option<CharId>,
        content: Vec<Node>,
    },
    DeleteText {
        target: OpId,
        atoms: Vec<CharId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ReplicaOp {
    id: OpId,
    lamport: u64,
    kind: OpKind,
}

impl ReplicaOp {
    fn stamp(&self) -> Stamp {
        Stamp {
            lamport: self.lamport,
            peer: self.id.peer,
        }
    }

    /// Ops that must be integrated before this one.
    fn dependencies(&self) -> Vec<OpId> {
        match &self.kind {
            OpKind::Insert { after, .. } => after.iter().copied().collect(),
            OpKind::Reshape { target, .. } | OpKind::Delete { target } => vec![*target],
            OpKind::InsertText { target, after, .. } => {
                let mut deps = vec![*target];
                deps.extend(after.map(|atom| atom.op));
                deps
            }
            OpKind::DeleteText { target, atoms } => {
                let mut deps = vec![*target];
                deps.extend(atoms.iter().map(|atom| atom.op));
                deps
            }
        }
    }
}

/// Splits inline content into atoms: one text node per grapheme, other
/// inline nodes as they are.
fn explode(children: &[Node]) -> Vec<Node> {
    let mut atoms = Vec::new();
    for child in children {
        match child.kind {
            NodeKind::Text => atoms.extend(
                child
                    .text_str()
                    .graphemes(true)
                    .map(|grapheme| Node::text_with_marks(grapheme, child.marks.clone())),
            ),
            kind if kind.is_inline() => atoms.push(child.clone()),
            _ => {}
        }
    }
    atoms
}

fn is_atom(node: &Node) -> bool {
    match node.kind {
        NodeKind::Text => node.text_str().graphemes(true).count() == 1,
        kind => kind.is_inline() && node.children.is_empty(),
    }
}

/// The part of a block kept in its last-writer-wins register.
fn shell_of(node: &Node) -> Node {
    if node.is_textblock() {
        Node {
            children: Vec::new(),
            ..node.clone()
        }
    } else {
        node.clone()
    }
}

#[derive(Debug, Clone)]
struct Block {
    shell: LwwRegister<Node>,
    version: OpId,
    text: Sequence<CharId, Node>,
}

impl Block {
    fn new(id: OpId, stamp: Stamp, node: &Node) -> Self {
        let mut block = Self {
            shell: LwwRegister::new(shell_of(node), stamp),
            version: id,
            text: Sequence::new(),
        };
        if node.is_textblock() {
            block.insert_text(id, stamp, None, &explode(&node.children));
        }
        block
    }

    fn insert_text(&mut self, op: OpId, stamp: Stamp, after: Option<CharId>, content: &[Node]) {
        let mut anchor = after;
        for (index, atom) in (0u32..).zip(content) {
            let id = CharId { op, index };
            if !self.text.insert(id, anchor, stamp, atom.clone()) {
                return;
            }
            anchor = Some(id);
        }
    }

    fn project(&self) -> Node {
        let mut node = self.shell.get();
        if !node.is_textblock() {
            return node;
        }
        let atoms: Vec<Node> = self
            .text
            .visible()
            .map(|element| element.value.clone())
            .collect();
        node.children = if node.kind == NodeKind::CodeBlock {
            plain_inline(atoms)
        } else {
            let mut atoms = atoms;
            normalize_inline(&mut atoms);
            atoms
        };
        node
    }

    fn writers(&self) -> BTreeSet<PeerId> {
        let mut writers = BTreeSet::from([self.version.peer]);
        if self.shell.get_ref().is_textblock() {
            writers.extend(self.text.visible().map(|element| element.id.op.peer));
        }
        writers
    }

    fn visible_atoms(&self) -> Vec<CharId> {
        self.text.visible().map(|element| element.id).collect()
    }

    /// Groups the visible atoms among `targets` into adjacent runs.
    fn runs(&self, targets: &BTreeSet<CharId>) -> Vec<RemovedRun> {
        let mut runs = Vec::new();
        let mut current: Option<RemovedRun> = None;
        for element in self.text.visible() {
            if targets.contains(&element.id) {
                let run = current.get_or_insert_with(|| RemovedRun {
                    last: element.id,
                    content: Vec::new(),
                });
                run.last = element.id;
                run.content.push(element.value.clone());
            } else if let Some(run) = current.take() {
                runs.push(run);
            }
        }
        runs.extend(current);
        for run in &mut runs {
            normalize_inline(&mut run.content);
        }
        runs
    }
}

fn encode(ops: &[ReplicaOp]) -> Delta {
    // Encoding plain data structs to JSON cannot fail.
    Delta(serde_json::to_vec(ops).unwrap_or_default())
}

fn decode(delta: &Delta) -> Result<Vec<ReplicaOp>, ReplicaError> {
    serde_json::from_slice(delta.as_bytes()).map_err(|err| ReplicaError::Malformed(err.to_string()))
}

pub struct BlockReplica {
    peer: PeerId,
    expose_identity: bool,
    lamport: u64,
    log: BTreeMap<OpId, ReplicaOp>,
    blocks: Sequence<OpId, Block>,
    pending: BTreeMap<OpId, ReplicaOp>,
    state: StateVector,
    limits: ValidationLimits,
    observers: Vec<(DeltaObserverId, DeltaObserver)>,
    next_observer: u64,
}

impl std::fmt::Debug for BlockReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReplica")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("blocks", &self.blocks.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl BlockReplica {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            expose_identity: true,
            lamport: 0,
            log: BTreeMap::new(),
            blocks: Sequence::new(),
            pending: BTreeMap::new(),
            state: StateVector::new(),
            limits: ValidationLimits::default(),
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    /// A replica with a random per-process peer id.
    pub fn with_random_peer() -> Self {
        Self::new(uuid::Uuid::new_v4().as_u64_pair().0)
    }

    pub fn with_limits(mut self, limits: ValidationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Keeps the peer id internal: [`ReplicatedState::client_id`] returns `None`.
    pub fn without_identity(mut self) -> Self {
        self.expose_identity = false;
        self
    }

    pub fn into_shared(self) -> SharedReplica {
        Rc::new(RefCell::new(self))
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn notify(&mut self, origin: DeltaOrigin, ops: &[ReplicaOp]) {
        if ops.is_empty() {
            return;
        }
        let event = DeltaEvent {
            origin,
            delta: encode(ops),
        };
        for (_, observer) in &mut self.observers {
            observer(&event);
        }
    }

    fn is_ready(&self, op: &ReplicaOp) -> bool {
        op.id.counter == self.state.next_for(op.id.peer)
            && op
                .dependencies()
                .iter()
                .all(|dependency| self.log.contains_key(dependency))
    }

    /// Ops whose target or anchor never materialised are recorded but
    /// change nothing.
    fn integrate(&mut self, op: ReplicaOp) {
        let stamp = op.stamp();
        self.lamport = self.lamport.max(op.lamport);
        self.state.set(op.id.peer, op.id.counter);
        match &op.kind {
            OpKind::Insert { after, node } => {
                self.blocks
                    .insert(op.id, *after, stamp, Block::new(op.id, stamp, node));
            }
            OpKind::Reshape { target, node } => {
                if let Some(element) = self.blocks.get_mut(target)
                    && element.value.shell.set(shell_of(node), stamp)
                {
                    element.value.version = op.id;
                }
            }
            OpKind::Delete { target } => {
                self.blocks.delete(target);
            }
            OpKind::InsertText {
                target,
                after,
                content,
            } => {
                if let Some(element) = self.blocks.get_mut(target) {
                    element.value.insert_text(op.id, stamp, *after, content);
                }
            }
            OpKind::DeleteText { target, atoms } => {
                if let Some(element) = self.blocks.get_mut(target) {
                    for atom in atoms {
                        element.value.text.delete(atom);
                    }
                }
            }
        }
        self.log.insert(op.id, op);
    }

    /// Applies buffered ops that became ready, repeating until none is.
    fn drain_pending(&mut self, applied: &mut Vec<ReplicaOp>) {
        let mut made_progress = true;
        while made_progress {
            made_progress = false;
            let ready: Vec<OpId> = self
                .pending
                .values()
                .filter(|op| self.is_ready(op))
                .map(|op| op.id)
                .collect();
            for id in ready {
                if let Some(op) = self.pending.remove(&id)
                    && self.is_ready(&op)
                {
                    applied.push(op.clone());
                    self.integrate(op);
                    made_progress = true;
                }
            }
        }
    }

    fn validate(&self, ops: &[ReplicaOp], bytes: usize) -> Result<(), ReplicaError> {
        if ops.len() > self.limits.max_ops_per_delta {
            return Err(ReplicaError::ResourceLimitExceeded {
                limit: self.limits.max_ops_per_delta,
                actual: ops.len(),
            });
        }
        if bytes > self.limits.max_payload_bytes {
            return Err(ReplicaError::ResourceLimitExceeded {
                limit: self.limits.max_payload_bytes,
                actual: bytes,
            });
        }
        if self.pending.len() + ops.len() > self.limits.max_pending {
            return Err(ReplicaError::ResourceLimitExceeded {
                limit: self.limits.max_pending,
                actual: self.pending.len() + ops.len(),
            });
        }
        for op in ops {
            if op.id.counter == 0 {
                return Err(ReplicaError::Malformed(format!(
                    "op {:?}: counter cannot be zero",
                    op.id
                )));
            }
            if let OpKind::InsertText { content, .. } = &op.kind
                && !content.iter().all(is_atom)
            {
                return Err(ReplicaError::Malformed(format!(
                    "op {:?}: text content must be single atoms",
                    op.id
                )));
            }
        }
        Ok(())
    }

    fn next_op(&mut self, kind: OpKind) -> ReplicaOp {
        self.lamport += 1;
        ReplicaOp {
            id: OpId::new(self.peer, self.state.next_for(self.peer)),
            lamport: self.lamport,
            kind,
        }
    }

    /// Creates, records, and integrates one local op.
    fn commit(&mut self, kind: OpKind, ops: &mut Vec<ReplicaOp>) -> OpId {
        let op = self.next_op(kind);
        let id = op.id;
        ops.push(op.clone());
        self.integrate(op);
        id
    }

    fn visible(&self, key: &OpId) -> Option<&Block> {
        self.blocks
            .get(key)
            .filter(|element| !element.deleted)
            .map(|element| &element.value)
    }

    fn previous_visible(&self, key: &OpId) -> Option<OpId> {
        let mut previous = None;
        for element in self.blocks.visible() {
            if element.id == *key {
                break;
            }
            previous = Some(element.id);
        }
        previous
    }

    fn check(&self, edit: &BlockEdit) -> Result<(), ReplicaError> {
        let block = |key: &OpId| self.visible(key).ok_or(ReplicaError::UnknownBlock(*key));
        match edit {
            BlockEdit::Insert { after, .. } => match after {
                Some(after) if !self.blocks.contains(after) => {
                    Err(ReplicaError::UnknownBlock(*after))
                }
                _ => Ok(()),
            },
            BlockEdit::Update { key, .. }
            | BlockEdit::Reshape { key, .. }
            | BlockEdit::Delete { key } => block(key).map(|_| ()),
            BlockEdit::InsertText { key, after, .. } => {
                let block = block(key)?;
                match after {
                    Some(atom) if !block.text.contains(atom) => {
                        Err(ReplicaError::UnknownPosition(*atom))
                    }
                    _ => Ok(()),
                }
            }
            BlockEdit::DeleteText { key, atoms } => {
                let block = block(key)?;
                match atoms.iter().find(|atom| !block.text.contains(atom)) {
                    Some(atom) => Err(ReplicaError::UnknownPosition(*atom)),
                    None => Ok(()),
                }
            }
        }
    }

    fn reshape(
        &mut self,
        key: OpId,
        node: &Node,
        ops: &mut Vec<ReplicaOp>,
        changes: &mut Vec<BlockChange>,
    ) {
        let Some(block) = self.visible(&key) else {
            return;
        };
        let before = block.shell.get();
        let shell = shell_of(node);
        if before == shell {
            return;
        }
        let version = self.commit(
            OpKind::Reshape {
                target: key,
                node: shell,
            },
            ops,
        );
        changes.push(BlockChange::Reshaped {
            key,
            before,
            version,
        });
    }

    /// Rewrites the visible text of `key` into `atoms`, touching only the
    /// span between the common prefix and suffix.
    fn retype(
        &mut self,
        key: OpId,
        atoms: Vec<Node>,
        ops: &mut Vec<ReplicaOp>,
        changes: &mut Vec<BlockChange>,
    ) {
        let Some(block) = self.visible(&key) else {
            return;
        };
        let (old_ids, old): (Vec<CharId>, Vec<Node>) = block
            .text
            .visible()
            .map(|element| (element.id, element.value.clone()))
            .unzip();
        let prefix = old.iter().zip(&atoms).take_while(|(a, b)| a == b).count();
        let suffix = old[prefix..]
            .iter()
            .rev()
            .zip(atoms[prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .count();

        let removed: BTreeSet<CharId> = old_ids[prefix..old.len() - suffix]
            .iter()
            .copied()
            .collect();
        let inserted = atoms[prefix..atoms.len() - suffix].to_vec();
        let after = prefix.checked_sub(1).map(|index| old_ids[index]);

        let mut patch = TextPatch {
            inserted: Vec::new(),
            removed: block.runs(&removed),
        };
        if !removed.is_empty() {
            self.commit(
                OpKind::DeleteText {
                    target: key,
                    atoms: removed.into_iter().collect(),
                },
                ops,
            );
        }
        if !inserted.is_empty() {
            patch.inserted = self.write_text(key, after, inserted, ops);
        }
        if !patch.is_empty() {
            changes.push(BlockChange::Retyped { key, patch });
        }
    }

    fn write_text(
        &mut self,
        key: OpId,
        after: Option<CharId>,
        content: Vec<Node>,
        ops: &mut Vec<ReplicaOp>,
    ) -> Vec<CharId> {
        let count = content.len();
        let op = self.commit(
            OpKind::InsertText {
                target: key,
                after,
                content,
            },
            ops,
        );
        (0u32..).take(count).map(|index| CharId { op, index }).collect()
    }

    fn remove_text(
        &mut self,
        key: OpId,
        atoms: &[CharId],
        ops: &mut Vec<ReplicaOp>,
        changes: &mut Vec<BlockChange>,
    ) {
        let Some(block) = self.visible(&key) else {
            return;
        };
        let targets: BTreeSet<CharId> = atoms.iter().copied().collect();
        let removed = block.runs(&targets);
        if removed.is_empty() {
            return;
        }
        let live: Vec<CharId> = block
            .visible_atoms()
            .into_iter()
            .filter(|atom| targets.contains(atom))
            .collect();
        self.commit(
            OpKind::DeleteText {
                target: key,
                atoms: live,
            },
            ops,
        );
        changes.push(BlockChange::Retyped {
            key,
            patch: TextPatch {
                inserted: Vec::new(),
                removed,
            },
        });
    }
}

impl ReplicatedState for BlockReplica {
    fn client_id(&self) -> Option<ClientId> {
        self.expose_identity.then_some(self.peer)
    }

    fn blocks(&self) -> Vec<SharedBlock> {
        self.blocks
            .visible()
            .map(|element| SharedBlock {
                key: element.id,
                version: element.value.version,
                node: element.value.project(),
                writers: element.value.writers(),
            })
            .collect()
    }

    fn edit(&mut self, edits: Vec<BlockEdit>) -> Result<Vec<BlockChange>, ReplicaError> {
        for edit in &edits {
            self.check(edit)?;
        }

        let mut ops = Vec::new();
        let mut changes = Vec::new();
        for edit in edits {
            match edit {
                BlockEdit::Insert { after, nodes } => {
                    let mut anchor = after;
                    for node in nodes {
                        let key = self.commit(OpKind::Insert { after: anchor, node }, &mut ops);
                        anchor = Some(key);
                        let text = self
                            .visible(&key)
                            .map(Block::visible_atoms)
                            .unwrap_or_default();
                        changes.push(BlockChange::Inserted { key, text });
                    }
                }
                BlockEdit::Update { key, node } => {
                    self.reshape(key, &node, &mut ops, &mut changes);
                    let atoms = if node.is_textblock() {
                        explode(&node.children)
                    } else {
                        Vec::new()
                    };
                    self.retype(key, atoms, &mut ops, &mut changes);
                }
                BlockEdit::Reshape { key, node } => {
                    self.reshape(key, &node, &mut ops, &mut changes);
                }
                BlockEdit::InsertText {
                    key,
                    after,
                    content,
                } => {
                    let content = explode(&content);
                    if content.is_empty() {
                        continue;
                    }
                    let inserted = self.write_text(key, after, content, &mut ops);
                    changes.push(BlockChange::Retyped {
                        key,
                        patch: TextPatch {
                            inserted,
                            removed: Vec::new(),
                        },
                    });
                }
                BlockEdit::DeleteText { key, atoms } => {
                    self.remove_text(key, &atoms, &mut ops, &mut changes);
                }
                BlockEdit::Delete { key } => {
                    let Some(before) = self.visible(&key).map(Block::project) else {
                        continue;
                    };
                    let anchor = self.previous_visible(&key);
                    self.commit(OpKind::Delete { target: key }, &mut ops);
                    changes.push(BlockChange::Deleted {
                        key,
                        before,
                        anchor,
                    });
                }
            }
        }
        self.notify(DeltaOrigin::Local, &ops);
        Ok(changes)
    }

    fn apply_delta(&mut self, delta: &Delta) -> Result<ApplyOutcome, ReplicaError> {
        // An up-to-date peer has nothing to send.
        if delta.is_empty() {
            return Ok(ApplyOutcome::default());
        }
        let ops = decode(delta)?;
        self.validate(&ops, delta.len())?;

        let mut outcome = ApplyOutcome::default();
        let mut applied = Vec::new();
        for op in ops {
            // Redelivery is a no-op.
            if self.state.contains(&op.id) || self.pending.contains_key(&op.id) {
                continue;
            }
            if self.is_ready(&op) {
                applied.push(op.clone());
                self.integrate(op);
                self.drain_pending(&mut applied);
            } else {
                outcome.buffered.push(op.id);
                self.pending.insert(op.id, op);
            }
        }

        outcome.applied = applied.iter().map(|op| op.id).collect();
        outcome
            .buffered
            .retain(|id| self.pending.contains_key(id));
        self.notify(DeltaOrigin::Remote, &applied);
        Ok(outcome)
    }

    fn observe_delta(&mut self, observer: DeltaObserver) -> DeltaObserverId {
        let id = DeltaObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    fn unobserve_delta(&mut self, id: DeltaObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    fn state_vector(&self) -> StateVector {
        self.state.clone()
    }

    fn delta_since(&self, since: &StateVector) -> Delta {
        let mut ops: Vec<ReplicaOp> = self
            .log
            .values()
            .filter(|op| !since.contains(&op.id))
            .cloned()
            .collect();
        if ops.is_empty() {
            return Delta::default();
        }
        ops.sort_by_key(|op| (op.lamport, op.id.peer, op.id.counter));
        encode(&ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Node {
        Node::paragraph(vec![Node::text(text)])
    }

    fn texts(replica: &BlockReplica) -> Vec<String> {
        replica
            .blocks()
            .iter()
            .map(|block| block.node.text_content())
            .collect()
    }

    fn seeded(text: &str) -> (BlockReplica, BlockReplica, OpId) {
        let mut a = BlockReplica::new(1);
        let mut b = BlockReplica::new(2);
        a.edit(vec![BlockEdit::Insert {
            after: None,
            nodes: vec![p(text)],
        }])
        .unwrap();
        b.apply_delta(&a.delta_since(&StateVector::new())).unwrap();
        let key = a.blocks()[0].key;
        (a, b, key)
    }

    fn exchange(a: &mut BlockReplica, b: &mut BlockReplica) {
        let to_b = a.delta_since(&b.state_vector());
        let to_a = b.delta_since(&a.state_vector());
        a.apply_delta(&to_a).unwrap();
        b.apply_delta(&to_b).unwrap();
    }

    #[test]
    fn test_insert_run_keeps_order() {
        let mut replica = BlockReplica::new(1);
        let changes = replica
            .edit(vec![BlockEdit::Insert {
                after: None,
                nodes: vec![p("a"), p("b"), p("c")],
            }])
            .unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(texts(&replica), vec!["a", "b", "c"]);

        let first = replica.blocks()[0].key;
        replica
            .edit(vec![BlockEdit::Insert {
                after: Some(first),
                nodes: vec![p("x")],
            }])
            .unwrap();
        assert_eq!(texts(&replica), vec!["a", "x", "b", "c"]);
    }

    #[test]
    fn test_concurrent_rewrites_keep_both_texts() {
        let (mut a, mut b, key) = seeded("base");
        a.edit(vec![BlockEdit::Update { key, node: p("from a") }])
            .unwrap();
        b.edit(vec![BlockEdit::Update { key, node: p("from b") }])
            .unwrap();
        exchange(&mut a, &mut b);

        assert_eq!(a.blocks(), b.blocks());
        assert_eq!(texts(&a), vec!["from bfrom a"]);
    }

    #[test]
    fn test_concurrent_typing_in_one_paragraph_merges() {
        let (mut a, mut b, key) = seeded("hello");
        a.edit(vec![BlockEdit::Update { key, node: p("A hello") }])
            .unwrap();
        b.edit(vec![BlockEdit::Update { key, node: p("hello B") }])
            .unwrap();
        exchange(&mut a, &mut b);

        assert_eq!(texts(&a), vec!["A hello B"]);
        assert_eq!(a.blocks(), b.blocks());
        assert_eq!(a.blocks()[0].writers, BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_shell_and_text_merge_independently() {
        let (mut a, mut b, key) = seeded("title");
        a.edit(vec![BlockEdit::Update {
            key,
            node: Node::heading(1, vec![Node::text("title")]),
        }])
        .unwrap();
        b.edit(vec![BlockEdit::Update { key, node: p("title!") }])
            .unwrap();
        exchange(&mut a, &mut b);

        let expected = Node::heading(1, vec![Node::text("title!")]);
        assert_eq!(a.blocks()[0].node, expected);
        assert_eq!(b.blocks()[0].node, expected);
    }

    #[test]
    fn test_update_reports_minimal_patch() {
        let (mut a, _, key) = seeded("abcd");
        let changes = a
            .edit(vec![BlockEdit::Update { key, node: p("aXd") }])
            .unwrap();
        let [BlockChange::Retyped { patch, .. }] = changes.as_slice() else {
            panic!("expected one text patch, got {changes:?}");
        };
        assert_eq!(patch.inserted.len(), 1);
        assert_eq!(patch.removed.len(), 1);
        assert_eq!(patch.removed[0].content, vec![Node::text("bc")]);

        // Restoring after the last removed atom puts the text back in place.
        let inserted = patch.inserted.clone();
        let run = patch.removed[0].clone();
        a.edit(vec![
            BlockEdit::DeleteText {
                key,
                atoms: inserted,
            },
            BlockEdit::InsertText {
                key,
                after: Some(run.last),
                content: run.content,
            },
        ])
        .unwrap();
        assert_eq!(texts(&a), vec!["abcd"]);
    }

    #[test]
    fn test_code_block_text_stays_plain() {
        let mut replica = BlockReplica::new(1);
        let block = Node::code_block("rust", "fn main() {\n}");
        replica
            .edit(vec![BlockEdit::Insert {
                after: None,
                nodes: vec![block.clone()],
            }])
            .unwrap();
        assert_eq!(replica.blocks()[0].node, block);
    }

    #[test]
    fn test_out_of_order_ops_are_buffered() {
        let mut a = BlockReplica::new(1);
        let mut b = BlockReplica::new(2);
        a.edit(vec![BlockEdit::Insert {
            after: None,
            nodes: vec![p("one")],
        }])
        .unwrap();
        let first = a.delta_since(&StateVector::new());
        let mut seen = StateVector::new();
        seen.set(1, 1);
        let key = a.blocks()[0].key;
        a.edit(vec![BlockEdit::Reshape {
            key,
            node: Node::heading(2, Vec::new()),
        }])
        .unwrap();
        let second = a.delta_since(&seen);

        let outcome = b.apply_delta(&second).unwrap();
        assert!(outcome.applied.is_empty());
        assert_eq!(b.pending_count(), 1);

        let outcome = b.apply_delta(&first).unwrap();
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(b.blocks()[0].node, Node::heading(2, vec![Node::text("one")]));

        // Redelivery changes nothing.
        let outcome = b.apply_delta(&first).unwrap();
        assert!(outcome.applied.is_empty());
    }

    #[test]
    fn test_text_ops_wait_for_their_anchor() {
        let (mut a, mut c, key) = seeded("ab");
        let base = a.state_vector();
        a.edit(vec![BlockEdit::Update { key, node: p("abc") }])
            .unwrap();
        let typed = a.state_vector();
        a.edit(vec![BlockEdit::Update { key, node: p("abcd") }])
            .unwrap();

        c.apply_delta(&a.delta_since(&typed)).unwrap();
        assert_eq!(c.pending_count(), 1);
        assert_eq!(texts(&c), vec!["ab"]);

        c.apply_delta(&a.delta_since(&base)).unwrap();
        assert_eq!(c.pending_count(), 0);
        assert_eq!(texts(&c), vec!["abcd"]);
    }

    #[test]
    fn test_empty_delta_from_caught_up_peer_is_accepted() {
        let (a, mut b, _) = seeded("same");
        let delta = a.delta_since(&b.state_vector());
        assert!(delta.is_empty());
        assert_eq!(b.apply_delta(&delta), Ok(ApplyOutcome::default()));
        assert_eq!(texts(&b), vec!["same"]);
    }

    #[test]
    fn test_limits_and_malformed_input() {
        let mut replica = BlockReplica::new(1).with_limits(ValidationLimits {
            max_ops_per_delta: 1,
            ..ValidationLimits::default()
        });
        let mut source = BlockReplica::new(2);
        source
            .edit(vec![BlockEdit::Insert {
                after: None,
                nodes: vec![p("a"), p("b")],
            }])
            .unwrap();
        assert!(matches!(
            replica.apply_delta(&source.delta_since(&StateVector::new())),
            Err(ReplicaError::ResourceLimitExceeded { limit: 1, actual: 2 })
        ));
        assert!(matches!(
            replica.apply_delta(&Delta::from_bytes(b"not json".to_vec())),
            Err(ReplicaError::Malformed(_))
        ));
    }

    #[test]
    fn test_multi_grapheme_text_op_is_rejected() {
        let op = ReplicaOp {
            id: OpId::new(3, 1),
            lamport: 1,
            kind: OpKind::InsertText {
                target: OpId::new(3, 1),
                after: None,
                content: vec![Node::text("ab")],
            },
        };
        let mut replica = BlockReplica::new(1);
        assert!(matches!(
            replica.apply_delta(&encode(&[op])),
            Err(ReplicaError::Malformed(_))
        ));
    }

    #[test]
    fn test_observers_see_origin() {
        let mut replica = BlockReplica::new(1);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = replica.observe_delta(Box::new(move |event| sink.borrow_mut().push(event.origin)));
        replica
            .edit(vec![BlockEdit::Insert {
                after: None,
                nodes: vec![p("a")],
            }])
            .unwrap();
        assert_eq!(*seen.borrow(), vec![DeltaOrigin::Local]);
        assert!(replica.unobserve_delta(id));
    }

    #[test]
    fn test_edit_rejects_unknown_references() {
        let mut replica = BlockReplica::new(1);
        let missing = OpId::new(9, 1);
        assert_eq!(
            replica.edit(vec![BlockEdit::Delete { key: missing }]),
            Err(ReplicaError::UnknownBlock(missing))
        );
        assert!(replica.blocks().is_empty());

        replica
            .edit(vec![BlockEdit::Insert {
                after: None,
                nodes: vec![p("a")],
            }])
            .unwrap();
        let key = replica.blocks()[0].key;
        let atom = CharId {
            op: missing,
            index: 0,
        };
        assert_eq!(
            replica.edit(vec![BlockEdit::DeleteText {
                key,
                atoms: vec![atom]
            }]),
            Err(ReplicaError::UnknownPosition(atom))
        );
    }

    #[test]
    fn test_identity_can_be_hidden() {
        assert_eq!(BlockReplica::new(5).client_id(), Some(5));
        assert_eq!(BlockReplica::new(5).without_identity().client_id(), None);
    }
}
