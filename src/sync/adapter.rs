//! Bridges the document model and a replicated state.
//!
//! Local transactions are mirrored into the replica as block edits and the
//! resulting deltas are broadcast. Incoming messages are queued by the
//! transport handler and processed by [`SyncAdapter::process_incoming`];
//! remote replica changes are replayed into the model with
//! [`Origin::Remote`] so they never enter the local undo stack.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use super::presence::{LocalIdentity, PresenceRecord, PresenceTable};
use super::provider::{SharedProvider, SubscriptionId, WireMessage};
use super::replica::{
    BlockChange, BlockEdit, ClientId, DeltaEvent, DeltaObserverId, DeltaOrigin, ReplicaError,
    SharedBlock, SharedReplica, ValidationLimits,
};
use crate::core::OpId;
use crate::error::CollabError;
use crate::model::node::Node;
use crate::model::position::Selection;
use crate::model::{ChangeNotification, DocumentModel, Origin};

/// What one call to [`SyncAdapter::process_incoming`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingSummary {
    pub change: Option<ChangeNotification>,
    pub messages: usize,
    /// Deltas that failed validation and were dropped.
    pub rejected: Vec<ReplicaError>,
    pub presence_changed: bool,
}

pub struct SyncAdapter {
    replica: SharedReplica,
    provider: SharedProvider,
    client: ClientId,
    identity: LocalIdentity,
    selection: Option<Selection>,
    /// Replica keys of the model's top-level blocks, in order. Empty while
    /// the replica holds no blocks and the model shows a placeholder.
    keys: Vec<OpId>,
    shadow: Vec<Node>,
    inbox: Rc<RefCell<VecDeque<WireMessage>>>,
    events: Rc<RefCell<VecDeque<DeltaEvent>>>,
    subscription: Option<SubscriptionId>,
    observer: Option<DeltaObserverId>,
    presence: PresenceTable,
    max_payload_bytes: usize,
}

impl std::fmt::Debug for SyncAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAdapter")
            .field("client", &self.client)
            .field("blocks", &self.keys.len())
            .field("inbox", &self.inbox.borrow().len())
            .field("presence", &self.presence.len())
            .finish()
    }
}

fn placeholder() -> Node {
    Node::doc(vec![Node::paragraph(Vec::new())])
}

impl SyncAdapter {
    /// Binds the model to the replica and the transport.
    ///
    /// Validates the replica projection before touching the transport. When
    /// the replica is empty the model content seeds it; otherwise the
    /// replica content replaces the model. Anything acquired is released
    /// again when a later step fails.
    pub fn activate(
        replica: SharedReplica,
        provider: SharedProvider,
        client: ClientId,
        identity: LocalIdentity,
        model: &mut DocumentModel,
    ) -> Result<Self, CollabError> {
        let projection: Vec<Node> = replica
            .borrow()
            .blocks()
            .into_iter()
            .map(|block| block.node)
            .collect();
        model
            .registry()
            .validate(&Node::doc(projection.clone()))
            .map_err(|err| CollabError::MalformedReplica(err.to_string()))?;

        provider.borrow_mut().connect()?;
        let mut adapter = Self {
            replica,
            provider,
            client,
            identity,
            selection: None,
            keys: Vec::new(),
            shadow: Vec::new(),
            inbox: Rc::new(RefCell::new(VecDeque::new())),
            events: Rc::new(RefCell::new(VecDeque::new())),
            subscription: None,
            observer: None,
            presence: PresenceTable::new(),
            max_payload_bytes: ValidationLimits::default().max_payload_bytes,
        };
        match adapter.attach(projection.is_empty(), model) {
            Ok(()) => Ok(adapter),
            Err(err) => {
                adapter.detach();
                Err(err)
            }
        }
    }

    fn attach(&mut self, replica_empty: bool, model: &mut DocumentModel) -> Result<(), CollabError> {
        let inbox = Rc::clone(&self.inbox);
        self.subscription = Some(self.provider.borrow_mut().subscribe(Box::new(
            move |message| inbox.borrow_mut().push_back(message),
        )));
        let events = Rc::clone(&self.events);
        self.observer = Some(self.replica.borrow_mut().observe_delta(Box::new(
            move |event| events.borrow_mut().push_back(event.clone()),
        )));

        if !replica_empty {
            self.replay(model, Origin::Remote)?;
        } else if *model.root() != placeholder() {
            let nodes = model.root().children.clone();
            tracing::debug!(blocks = nodes.len(), "seeding empty replica");
            self.edit_replica(vec![BlockEdit::Insert { after: None, nodes }])?;
        }
        self.flush();

        let state = self.replica.borrow().state_vector();
        self.provider.borrow_mut().broadcast(WireMessage::SyncRequest {
            from: self.client,
            state,
        })?;
        self.provider
            .borrow_mut()
            .broadcast(WireMessage::Presence(self.presence_record()))?;
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(id) = self.observer.take() {
            self.replica.borrow_mut().unobserve_delta(id);
        }
        if let Some(id) = self.subscription.take() {
            self.provider.borrow_mut().unsubscribe(id);
        }
        self.provider.borrow_mut().disconnect();
    }

    /// Announces departure and releases every subscription. The replica
    /// itself belongs to the host and is left intact.
    pub fn teardown(&mut self) {
        if self.subscription.is_none() && self.observer.is_none() {
            return;
        }
        if let Err(err) = self
            .provider
            .borrow_mut()
            .broadcast(WireMessage::Leave { client: self.client })
        {
            tracing::debug!(error = %err, "leave message not sent");
        }
        self.detach();
        self.presence.clear();
        self.inbox.borrow_mut().clear();
        self.events.borrow_mut().clear();
    }

    /// Deltas larger than this are dropped without reaching the replica.
    pub fn set_payload_limit(&mut self, bytes: usize) {
        self.max_payload_bytes = bytes;
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    /// Every visible block of the replica, by key.
    pub fn shared_blocks(&self) -> BTreeMap<OpId, SharedBlock> {
        self.replica
            .borrow()
            .blocks()
            .into_iter()
            .map(|block| (block.key, block))
            .collect()
    }

    /// Mirrors a committed local transaction into the replica and
    /// broadcasts the resulting delta.
    pub fn local_change(
        &mut self,
        notification: &ChangeNotification,
        root: &Node,
    ) -> Result<Vec<BlockChange>, CollabError> {
        if self.keys.is_empty() {
            let changes = self.edit_replica(vec![BlockEdit::Insert {
                after: None,
                nodes: root.children.clone(),
            }])?;
            self.flush();
            return Ok(changes);
        }

        let (old, new) = notification.range.top_level();
        if old.end > self.keys.len() || new.end > root.children.len() {
            return Err(CollabError::OutOfSync {
                index: old.end,
                known: self.keys.len(),
            });
        }
        let old_keys = &self.keys[old.clone()];
        let new_nodes = &root.children[new];
        let common = old_keys.len().min(new_nodes.len());

        let mut edits = Vec::new();
        for (offset, node) in new_nodes[..common].iter().enumerate() {
            if self.shadow[old.start + offset] != *node {
                edits.push(BlockEdit::Update {
                    key: old_keys[offset],
                    node: node.clone(),
                });
            }
        }
        if new_nodes.len() > common {
            let anchor = match common.checked_sub(1) {
                Some(last) => Some(old_keys[last]),
                None => old.start.checked_sub(1).map(|index| self.keys[index]),
            };
            edits.push(BlockEdit::Insert {
                after: anchor,
                nodes: new_nodes[common..].to_vec(),
            });
        }
        edits.extend(
            old_keys[common..]
                .iter()
                .map(|key| BlockEdit::Delete { key: *key }),
        );

        let changes = self.edit_replica(edits)?;
        self.flush();
        Ok(changes)
    }

    /// Applies undo or redo edits and replays the result into the model.
    pub(crate) fn apply_history(
        &mut self,
        edits: Vec<BlockEdit>,
        model: &mut DocumentModel,
    ) -> Result<Vec<BlockChange>, CollabError> {
        let changes = self.edit_replica(edits)?;
        self.replay(model, Origin::History)?;
        self.flush();
        Ok(changes)
    }

    /// Records the local selection and broadcasts it.
    pub fn update_selection(&mut self, selection: Option<Selection>) -> Result<(), CollabError> {
        self.selection = selection;
        self.provider
            .borrow_mut()
            .broadcast(WireMessage::Presence(self.presence_record()))?;
        Ok(())
    }

    fn presence_record(&self) -> PresenceRecord {
        PresenceRecord::new(self.client, &self.identity, self.selection.clone())
    }

    /// Handles every queued message, then replays remote replica changes
    /// into the model. Invalid deltas are dropped and reported.
    pub fn process_incoming(
        &mut self,
        model: &mut DocumentModel,
    ) -> Result<IncomingSummary, CollabError> {
        let mut summary = IncomingSummary::default();
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(message) = next else { break };
            summary.messages += 1;
            self.handle(message, &mut summary)?;
        }
        if self.flush() {
            summary.change = self.replay(model, Origin::Remote)?;
        }
        Ok(summary)
    }

    fn handle(
        &mut self,
        message: WireMessage,
        summary: &mut IncomingSummary,
    ) -> Result<(), CollabError> {
        match message {
            WireMessage::Delta { from, delta } if from != self.client => {
                if delta.len() > self.max_payload_bytes {
                    summary.rejected.push(ReplicaError::ResourceLimitExceeded {
                        limit: self.max_payload_bytes,
                        actual: delta.len(),
                    });
                    return Ok(());
                }
                let result = self.replica.borrow_mut().apply_delta(&delta);
                match result {
                    Ok(outcome) => tracing::debug!(
                        from,
                        applied = outcome.applied.len(),
                        buffered = outcome.buffered.len(),
                        "applied remote delta"
                    ),
                    Err(err) => {
                        tracing::warn!(from, error = %err, "rejected remote delta");
                        summary.rejected.push(err);
                    }
                }
            }
            WireMessage::SyncRequest { from, state } if from != self.client => {
                let delta = self.replica.borrow().delta_since(&state);
                let mut provider = self.provider.borrow_mut();
                if !delta.is_empty() {
                    provider.broadcast(WireMessage::Delta {
                        from: self.client,
                        delta,
                    })?;
                }
                provider.broadcast(WireMessage::Presence(self.presence_record()))?;
            }
            WireMessage::Presence(record) if record.client != self.client => {
                summary.presence_changed |= self.presence.upsert(record);
            }
            WireMessage::Leave { client } => {
                summary.presence_changed |= self.presence.remove(client).is_some();
            }
            _ => {}
        }
        Ok(())
    }

    fn edit_replica(&mut self, edits: Vec<BlockEdit>) -> Result<Vec<BlockChange>, CollabError> {
        if edits.is_empty() {
            return Ok(Vec::new());
        }
        let changes = self.replica.borrow_mut().edit(edits)?;
        self.reload();
        Ok(changes)
    }

    fn reload(&mut self) {
        let blocks = self.replica.borrow().blocks();
        self.keys = blocks.iter().map(|block| block.key).collect();
        self.shadow = blocks.into_iter().map(|block| block.node).collect();
    }

    fn replay(
        &mut self,
        model: &mut DocumentModel,
        origin: Origin,
    ) -> Result<Option<ChangeNotification>, CollabError> {
        self.reload();
        let root = if self.shadow.is_empty() {
            placeholder()
        } else {
            Node::doc(self.shadow.clone())
        };
        Ok(model.restore(root, origin)?)
    }

    /// Broadcasts queued local deltas. Returns whether remote changes were
    /// applied since the last flush.
    fn flush(&mut self) -> bool {
        let mut remote = false;
        loop {
            let next = self.events.borrow_mut().pop_front();
            let Some(event) = next else { break };
            match event.origin {
                DeltaOrigin::Remote => remote = true,
                DeltaOrigin::Local => {
                    let message = WireMessage::Delta {
                        from: self.client,
                        delta: event.delta,
                    };
                    if let Err(err) = self.provider.borrow_mut().broadcast(message) {
                        tracing::warn!(error = %err, "failed to broadcast local delta");
                    }
                }
            }
        }
        remote
    }
}

impl Drop for SyncAdapter {
    fn drop(&mut self) {
        self.teardown();
    }
}
