//! Editor session construction and the collaboration fallback state machine.
//!
//! [`SessionManager::build`] always yields a usable [`Session`]. Foundation
//! mode is reached unconditionally; collaboration is attempted only when
//! both a replicated document and a transport are configured, and any
//! failure while activating it falls back to Foundation mode. Only
//! structural errors in the initial content reach the caller.

mod config;
mod diagnostics;

pub use config::{EditorSettings, InitialContent, SessionConfig};
pub use diagnostics::{Diagnostics, MemoryDiagnostics, SessionEvent, TracingDiagnostics};

use serde::Serialize;
use std::rc::Rc;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::DocError;
use crate::markdown::MarkdownCodec;
use crate::model::node::{Mark, Node, NodeKind};
use crate::model::position::{Position, Selection, grapheme_len};
use crate::model::{
    ChangeNotification, DocumentModel, History, ObserverId, Op, Origin, Transaction,
};
use crate::paste::{self, PasteOutcome};
use crate::registry::indent::{IndentEdit, TabDirection, indent_edit};
use crate::registry::{
    Behavior, CaretFn, ExtensionDescriptor, Registry, compose_collaboration, compose_foundation,
};
use crate::sync::{
    CaretDecoration, ClientId, LocalIdentity, SharedProvider, SharedReplica, SyncAdapter,
    UndoManager, default_caret,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Uninitialized,
    Foundation,
    CollaborationValidating,
    CollaborationActive,
    CollaborationDegraded,
}

enum Mode {
    Foundation {
        history: History,
    },
    Collaborative {
        adapter: SyncAdapter,
        undo: UndoManager,
    },
}

/// Builds sessions, reporting through an injected [`Diagnostics`] sink.
#[derive(Clone)]
pub struct SessionManager {
    diagnostics: Rc<dyn Diagnostics>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Rc::new(TracingDiagnostics))
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(diagnostics: Rc<dyn Diagnostics>) -> Self {
        Self { diagnostics }
    }

    /// Builds a session from `config`.
    ///
    /// Fails only when the initial content is structurally invalid, for
    /// example when it names an unregistered block kind.
    pub fn build(&self, config: SessionConfig) -> Result<Session, DocError> {
        let SessionConfig {
            replicated_doc,
            transport_provider,
            local_identity,
            initial_content,
            settings,
        } = config;

        let registry = Arc::new(Registry::new(foundation_descriptors(&settings))?);
        let codec = MarkdownCodec::new(Arc::clone(&registry), settings.codec.clone());
        let root = match initial_content {
            None => None,
            Some(InitialContent::Markdown(text)) => Some(codec.parse(&text)?),
            Some(InitialContent::Raw(raw)) => Some(registry.build(&raw)?),
            Some(InitialContent::Tree(root)) => Some(root),
        };
        let model = match root {
            Some(root) => DocumentModel::with_root(Arc::clone(&registry), root)?,
            None => DocumentModel::new(Arc::clone(&registry)),
        };

        let mut session = Session {
            state: SessionState::Uninitialized,
            transitions: vec![SessionState::Uninitialized],
            mode: Mode::Foundation {
                history: History::new(settings.history_depth),
            },
            model,
            codec,
            settings,
            selection: None,
            diagnostics: Rc::clone(&self.diagnostics),
        };
        session.transition(SessionState::Foundation);

        match (replicated_doc, transport_provider) {
            (Some(replica), Some(provider)) => {
                session.collaborate(replica, provider, local_identity.unwrap_or_default());
            }
            (Some(_), None) => session.diagnostics.record(SessionEvent::CollaborationIncomplete {
                missing: "transportProvider",
            }),
            (None, Some(_)) => session.diagnostics.record(SessionEvent::CollaborationIncomplete {
                missing: "replicatedDoc",
            }),
            (None, None) => {}
        }
        Ok(session)
    }
}

/// Foundation descriptors with the configured tab unit.
fn foundation_descriptors(settings: &EditorSettings) -> Vec<ExtensionDescriptor> {
    compose_foundation()
        .into_iter()
        .map(|descriptor| match descriptor {
            ExtensionDescriptor::Behavior(Behavior::TabIndentation { .. }) => {
                ExtensionDescriptor::Behavior(Behavior::TabIndentation {
                    unit: settings.tab_indent.clone(),
                })
            }
            other => other,
        })
        .collect()
}

/// One editor instance: a document model plus, when collaborating, the
/// adapter binding it to the shared document.
pub struct Session {
    state: SessionState,
    transitions: Vec<SessionState>,
    mode: Mode,
    model: DocumentModel,
    codec: MarkdownCodec,
    settings: EditorSettings,
    selection: Option<Selection>,
    diagnostics: Rc<dyn Diagnostics>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("model", &self.model)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn transition(&mut self, to: SessionState) {
        self.diagnostics.record(SessionEvent::Transition {
            from: self.state,
            to,
        });
        self.state = to;
        self.transitions.push(to);
    }

    fn collaborate(
        &mut self,
        replica: SharedReplica,
        provider: SharedProvider,
        identity: LocalIdentity,
    ) {
        self.transition(SessionState::CollaborationValidating);

        let mut descriptors = foundation_descriptors(&self.settings);
        descriptors.extend(compose_collaboration());
        let registry = match Registry::new(descriptors) {
            Ok(registry) => Arc::new(registry),
            Err(err) => return self.degrade(err.to_string()),
        };
        let mut model = match DocumentModel::with_root(Arc::clone(&registry), self.model.serialize())
        {
            Ok(model) => model,
            Err(err) => return self.degrade(err.to_string()),
        };

        let exposed = replica.borrow().client_id();
        let client: ClientId = match exposed {
            Some(id) => id,
            None => {
                self.diagnostics.record(SessionEvent::MissingIdentity);
                uuid::Uuid::new_v4().as_u64_pair().0
            }
        };

        match SyncAdapter::activate(replica, provider, client, identity, &mut model) {
            Ok(mut adapter) => {
                adapter.set_payload_limit(self.settings.limits.max_payload_bytes);
                let tracked = registry
                    .replication()
                    .map(|spec| spec.tracked_origins.clone())
                    .unwrap_or_else(|| vec![Origin::Local]);
                self.mode = Mode::Collaborative {
                    adapter,
                    undo: UndoManager::new(tracked, self.settings.history_depth),
                };
                self.codec = MarkdownCodec::new(registry, self.settings.codec.clone());
                self.model = model;
                self.transition(SessionState::CollaborationActive);
            }
            Err(err) => self.degrade(err.to_string()),
        }
    }

    fn degrade(&mut self, reason: String) {
        self.diagnostics
            .record(SessionEvent::CollaborationFailed { reason });
        self.transition(SessionState::CollaborationDegraded);
        self.transition(SessionState::Foundation);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state this session passed through, in order.
    pub fn transitions(&self) -> &[SessionState] {
        &self.transitions
    }

    pub fn is_collaborative(&self) -> bool {
        matches!(self.mode, Mode::Collaborative { .. })
    }

    pub fn model(&self) -> &DocumentModel {
        &self.model
    }

    pub fn root(&self) -> &Node {
        self.model.root()
    }

    pub fn registry(&self) -> &Registry {
        self.model.registry()
    }

    pub fn codec(&self) -> &MarkdownCodec {
        &self.codec
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn subscribe(
        &mut self,
        observer: impl FnMut(&ChangeNotification) + 'static,
    ) -> ObserverId {
        self.model.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.model.unsubscribe(id)
    }

    /// Applies local ops.
    pub fn apply(&mut self, ops: Vec<Op>) -> Result<Option<ChangeNotification>, DocError> {
        self.commit(Transaction::local(ops))
    }

    /// Commits a transaction and, when collaborating, mirrors it into the
    /// replicated document. Replication failures are reported, not returned.
    pub fn commit(
        &mut self,
        transaction: Transaction,
    ) -> Result<Option<ChangeNotification>, DocError> {
        let origin = transaction.origin;
        let before = matches!(self.mode, Mode::Foundation { .. }).then(|| self.model.serialize());
        let Some(notification) = self.model.commit(transaction)? else {
            return Ok(None);
        };
        match &mut self.mode {
            Mode::Foundation { history } => {
                if origin == Origin::Local
                    && let Some(before) = before
                {
                    history.record(before);
                }
            }
            Mode::Collaborative { adapter, undo } => {
                match adapter.local_change(&notification, self.model.root()) {
                    Ok(changes) => undo.record(origin, changes),
                    Err(err) => self.diagnostics.record(SessionEvent::ReplicationFailed {
                        reason: err.to_string(),
                    }),
                }
            }
        }
        Ok(Some(notification))
    }

    /// Reverts the latest local change. In a collaborative session, edits
    /// made by other participants are never reverted.
    pub fn undo(&mut self) -> Result<bool, DocError> {
        match &mut self.mode {
            Mode::Foundation { history } => {
                let Some(previous) = history.undo(self.model.serialize()) else {
                    return Ok(false);
                };
                self.model.restore(previous, Origin::History)?;
                Ok(true)
            }
            Mode::Collaborative { adapter, undo } => {
                match undo.undo(adapter, &mut self.model) {
                    Ok(done) => Ok(done),
                    Err(err) => {
                        self.diagnostics.record(SessionEvent::ReplicationFailed {
                            reason: err.to_string(),
                        });
                        Ok(false)
                    }
                }
            }
        }
    }

    pub fn redo(&mut self) -> Result<bool, DocError> {
        match &mut self.mode {
            Mode::Foundation { history } => {
                let Some(next) = history.redo(self.model.serialize()) else {
                    return Ok(false);
                };
                self.model.restore(next, Origin::History)?;
                Ok(true)
            }
            Mode::Collaborative { adapter, undo } => {
                match undo.redo(adapter, &mut self.model) {
                    Ok(done) => Ok(done),
                    Err(err) => {
                        self.diagnostics.record(SessionEvent::ReplicationFailed {
                            reason: err.to_string(),
                        });
                        Ok(false)
                    }
                }
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        match &self.mode {
            Mode::Foundation { history } => history.can_undo(),
            Mode::Collaborative { undo, .. } => undo.can_undo(),
        }
    }

    pub fn can_redo(&self) -> bool {
        match &self.mode {
            Mode::Foundation { history } => history.can_redo(),
            Mode::Collaborative { undo, .. } => undo.can_redo(),
        }
    }

    /// Updates the local selection and broadcasts it to collaborators.
    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection.clone();
        if let Mode::Collaborative { adapter, .. } = &mut self.mode
            && let Err(err) = adapter.update_selection(selection)
        {
            self.diagnostics.record(SessionEvent::PresenceFailed {
                reason: err.to_string(),
            });
        }
    }

    /// Processes messages delivered by the transport since the last call.
    /// Returns the change remote edits made to the model, if any.
    pub fn process_incoming(&mut self) -> Option<ChangeNotification> {
        let Mode::Collaborative { adapter, .. } = &mut self.mode else {
            return None;
        };
        match adapter.process_incoming(&mut self.model) {
            Ok(summary) => {
                for err in summary.rejected {
                    self.diagnostics.record(SessionEvent::RemoteDeltaRejected {
                        reason: err.to_string(),
                    });
                }
                summary.change
            }
            Err(err) => {
                self.diagnostics.record(SessionEvent::ReplicationFailed {
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    /// Decorations for every remote participant, drawn by the registered
    /// presence renderer.
    pub fn remote_carets(&self) -> Vec<CaretDecoration> {
        let Mode::Collaborative { adapter, .. } = &self.mode else {
            return Vec::new();
        };
        let renderer = self
            .model
            .registry()
            .presence()
            .map_or(default_caret as CaretFn, |spec| spec.renderer);
        adapter.presence().iter().map(renderer).collect()
    }

    /// The document as markdown. A document holding nothing but one empty
    /// paragraph exports as the empty string.
    pub fn to_markdown(&self) -> String {
        match self.model.root().children.as_slice() {
            [only] if only.kind == NodeKind::Paragraph && only.children.is_empty() => String::new(),
            _ => self.codec.render(self.model.root()),
        }
    }

    /// Replaces the whole document with parsed markdown as one undoable
    /// local change.
    pub fn import_markdown(&mut self, text: &str) -> Result<Option<ChangeNotification>, DocError> {
        let doc = self.codec.parse(text)?;
        let end = self.model.root().children.len();
        self.apply(vec![Op::ReplaceBlocks {
            parent: Vec::new(),
            start: 0,
            end,
            blocks: doc.children,
        }])
    }

    /// Applies a plain-text paste when it carries structure. Every failure
    /// results in [`PasteOutcome::NotHandled`].
    pub fn paste(&mut self, text: &str) -> PasteOutcome {
        let plan = match paste::plan(&self.codec, text) {
            Ok(Some(plan)) => plan,
            Ok(None) => return PasteOutcome::NotHandled,
            Err(err) => {
                self.diagnostics.record(SessionEvent::PasteFallthrough {
                    reason: err.to_string(),
                });
                return PasteOutcome::NotHandled;
            }
        };
        let Some(ops) = paste::ops_for(plan, self.model.root(), self.selection.as_ref()) else {
            return PasteOutcome::NotHandled;
        };
        match self.apply(ops) {
            Ok(_) => PasteOutcome::Handled,
            Err(err) => {
                self.diagnostics.record(SessionEvent::PasteFallthrough {
                    reason: err.to_string(),
                });
                PasteOutcome::NotHandled
            }
        }
    }

    /// Inserts typed text at the selection, then applies the typed link
    /// rule to the text before the caret. The link conversion is its own
    /// transaction so undo reverts it first.
    pub fn handle_text_input(&mut self, text: &str) -> Result<Option<ChangeNotification>, DocError> {
        let Some(selection) = self.selection.clone() else {
            return Ok(None);
        };
        let (from, to) = selection.ordered();
        let mut ops = Vec::new();
        if !selection.is_collapsed() {
            ops.push(Op::DeleteRange {
                from: from.clone(),
                to: to.clone(),
            });
        }
        ops.push(Op::InsertText {
            at: from.clone(),
            text: text.to_string(),
        });
        let inserted = self.apply(ops)?;
        let caret = Position::new(from.path.clone(), from.offset + grapheme_len(text));
        self.set_selection(Some(Selection::caret(caret.clone())));

        let Some(block) = self.model.root().descendant(&caret.path) else {
            return Ok(inserted);
        };
        if block.kind == NodeKind::CodeBlock {
            return Ok(inserted);
        }
        let before: String = block
            .text_content()
            .graphemes(true)
            .take(caret.offset)
            .collect();
        let Some(link) = self
            .model
            .registry()
            .input_rules()
            .find_map(|rule| rule.typed(&before))
        else {
            return Ok(inserted);
        };

        let start = Position::new(caret.path.clone(), link.from);
        let label_end = Position::new(caret.path.clone(), link.from + grapheme_len(&link.label));
        let ops = vec![
            Op::DeleteRange {
                from: start.clone(),
                to: Position::new(caret.path.clone(), link.to),
            },
            Op::InsertText {
                at: start.clone(),
                text: link.label.clone(),
            },
            Op::SetMark {
                from: start,
                to: label_end.clone(),
                mark: Mark::link(link.href),
            },
        ];
        match self.apply(ops) {
            Ok(converted) => {
                self.set_selection(Some(Selection::caret(label_end)));
                Ok(converted.or(inserted))
            }
            Err(err) => {
                tracing::debug!(error = %err, "typed link not converted");
                Ok(inserted)
            }
        }
    }

    /// Indents or outdents the caret's line inside a code block. Returns
    /// `false` when the caret is not in a code block, so the host can use
    /// the key for focus navigation.
    pub fn handle_tab(&mut self, direction: TabDirection) -> Result<bool, DocError> {
        let Some(selection) = self.selection.clone() else {
            return Ok(false);
        };
        let head = selection.head;
        let Some(block) = self.model.root().descendant(&head.path) else {
            return Ok(false);
        };
        if block.kind != NodeKind::CodeBlock || !selection.anchor.path.eq(&head.path) {
            return Ok(false);
        }
        let unit = self
            .model
            .registry()
            .tab_unit()
            .unwrap_or(&self.settings.tab_indent)
            .to_string();
        let Some(edit) = indent_edit(&block.text_content(), head.offset, &unit, direction) else {
            return Ok(true);
        };

        let (op, offset) = match edit {
            IndentEdit::Insert { at, text } => {
                let offset = head.offset + grapheme_len(&text);
                let at = Position::new(head.path.clone(), at);
                (Op::InsertText { at, text }, offset)
            }
            IndentEdit::Delete { from, to } => {
                let offset = head.offset - (to.min(head.offset) - from.min(head.offset));
                (
                    Op::DeleteRange {
                        from: Position::new(head.path.clone(), from),
                        to: Position::new(head.path.clone(), to),
                    },
                    offset,
                )
            }
        };
        self.apply(vec![op])?;
        self.set_selection(Some(Selection::caret(Position::new(head.path, offset))));
        Ok(true)
    }

    /// Leaves the collaboration: announces departure, releases the
    /// transport subscription, and discards presence. The replicated
    /// document is left to its owner. Editing continues locally.
    pub fn teardown(&mut self) {
        if let Mode::Collaborative { adapter, .. } = &mut self.mode {
            adapter.teardown();
            self.mode = Mode::Foundation {
                history: History::new(self.settings.history_depth),
            };
            self.diagnostics.record(SessionEvent::TornDown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attrs;
    use crate::sync::{BlockReplica, LoopbackHub};

    fn manager() -> (SessionManager, Rc<MemoryDiagnostics>) {
        let diagnostics = Rc::new(MemoryDiagnostics::new());
        (SessionManager::new(diagnostics.clone()), diagnostics)
    }

    fn caret(path: &[usize], offset: usize) -> Option<Selection> {
        Some(Selection::caret(Position::new(path.to_vec(), offset)))
    }

    #[test]
    fn test_plain_config_is_foundation() {
        let (manager, _) = manager();
        let session = manager.build(SessionConfig::new()).unwrap();
        assert_eq!(session.state(), SessionState::Foundation);
        assert_eq!(
            session.transitions(),
            &[SessionState::Uninitialized, SessionState::Foundation]
        );
        assert!(!session.is_collaborative());
    }

    #[test]
    fn test_provider_alone_is_not_enough() {
        let (manager, diagnostics) = manager();
        let hub = LoopbackHub::new();
        let session = manager
            .build(SessionConfig::new().with_provider(hub.shared_provider()))
            .unwrap();
        assert_eq!(session.state(), SessionState::Foundation);
        assert!(diagnostics.contains(|event| matches!(
            event,
            SessionEvent::CollaborationIncomplete {
                missing: "replicatedDoc"
            }
        )));
    }

    #[test]
    fn test_rejected_connection_degrades_to_foundation() {
        let (manager, diagnostics) = manager();
        let hub = LoopbackHub::new();
        hub.reject_connections(Some("server unavailable"));
        let session = manager
            .build(
                SessionConfig::new()
                    .with_replica(BlockReplica::new(1).into_shared())
                    .with_provider(hub.shared_provider())
                    .with_markdown("keep me"),
            )
            .unwrap();

        assert_eq!(session.state(), SessionState::Foundation);
        assert_eq!(
            session.transitions(),
            &[
                SessionState::Uninitialized,
                SessionState::Foundation,
                SessionState::CollaborationValidating,
                SessionState::CollaborationDegraded,
                SessionState::Foundation,
            ]
        );
        assert_eq!(session.to_markdown(), "keep me");
        assert!(diagnostics.contains(
            |event| matches!(event, SessionEvent::CollaborationFailed { reason } if reason.contains("server unavailable"))
        ));
    }

    #[test]
    fn test_foundation_undo_redo() {
        let (manager, _) = manager();
        let mut session = manager.build(SessionConfig::new()).unwrap();
        session.set_selection(caret(&[0], 0));
        session.handle_text_input("hello").unwrap();
        assert_eq!(session.to_markdown(), "hello");
        assert!(session.undo().unwrap());
        assert_eq!(session.to_markdown(), "");
        assert!(session.redo().unwrap());
        assert_eq!(session.to_markdown(), "hello");
    }

    #[test]
    fn test_typed_link_converts() {
        let (manager, _) = manager();
        let mut session = manager.build(SessionConfig::new()).unwrap();
        session.set_selection(caret(&[0], 0));
        session
            .handle_text_input("see [docs](https://example.com")
            .unwrap();
        session.handle_text_input(")").unwrap();

        let paragraph = &session.root().children[0];
        assert_eq!(paragraph.text_content(), "see docs");
        assert!(paragraph.children[1].has_mark(crate::model::MarkKind::Link));
        assert_eq!(session.to_markdown(), "see [docs](https://example.com)");
        assert_eq!(session.selection(), caret(&[0], 8).as_ref());
    }

    #[test]
    fn test_tab_in_code_block() {
        let (manager, _) = manager();
        let mut session = manager
            .build(SessionConfig::new().with_tree(Node::doc(vec![Node::code_block(
                "rust",
                "fn a() {\nx\n}",
            )])))
            .unwrap();
        session.set_selection(caret(&[0], 10));
        assert!(session.handle_tab(TabDirection::Indent).unwrap());
        assert_eq!(session.root().children[0].text_content(), "fn a() {\n  x\n}");
        assert_eq!(session.selection(), caret(&[0], 12).as_ref());

        assert!(session.handle_tab(TabDirection::Outdent).unwrap());
        assert_eq!(session.root().children[0].text_content(), "fn a() {\nx\n}");

        session.set_selection(None);
        assert!(!session.handle_tab(TabDirection::Indent).unwrap());
    }

    #[test]
    fn test_tab_outside_code_block_is_not_handled() {
        let (manager, _) = manager();
        let mut session = manager.build(SessionConfig::new()).unwrap();
        session.set_selection(caret(&[0], 0));
        assert!(!session.handle_tab(TabDirection::Indent).unwrap());
    }

    #[test]
    fn test_structural_error_in_initial_content_propagates() {
        let (manager, _) = manager();
        let root = Node::doc(vec![Node::text("loose text")]);
        let err = manager
            .build(SessionConfig::new().with_tree(root))
            .unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_invalid_op_is_rejected_without_change() {
        let (manager, _) = manager();
        let mut session = manager
            .build(SessionConfig::new().with_markdown("# Title"))
            .unwrap();
        let err = session
            .apply(vec![Op::SetBlockType {
                path: vec![0],
                kind: NodeKind::Heading,
                attrs: Attrs::Heading { level: 9 },
            }])
            .unwrap_err();
        assert!(matches!(err, DocError::StructuralViolation { .. }));
        assert_eq!(session.to_markdown(), "# Title");
        assert!(!session.can_undo());
    }
}
