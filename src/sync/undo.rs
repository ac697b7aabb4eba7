//! Origin-scoped undo over the replicated block sequence.
//!
//! Entries remember what a tracked transaction wrote: inserted blocks,
//! shell rewrites, and the exact text atoms it added or removed. Undoing
//! an entry reverts only those writes, so text other participants typed
//! into the same block since then survives.

use std::collections::{BTreeMap, VecDeque};

use super::adapter::SyncAdapter;
use super::replica::{BlockChange, BlockEdit, SharedBlock};
use crate::core::OpId;
use crate::error::CollabError;
use crate::model::{DocumentModel, Origin};

#[derive(Debug, Clone)]
pub struct UndoManager {
    undo: VecDeque<Vec<BlockChange>>,
    redo: Vec<Vec<BlockChange>>,
    tracked: Vec<Origin>,
    depth: usize,
}

impl UndoManager {
    pub fn new(tracked: Vec<Origin>, depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            tracked,
            depth,
        }
    }

    pub fn tracks(&self, origin: Origin) -> bool {
        self.tracked.contains(&origin)
    }

    /// Records the writes of one transaction when its origin is tracked.
    pub fn record(&mut self, origin: Origin, changes: Vec<BlockChange>) {
        if !self.tracks(origin) || changes.is_empty() || self.depth == 0 {
            return;
        }
        if self.undo.len() == self.depth {
            self.undo.pop_front();
        }
        self.undo.push_back(changes);
        self.redo.clear();
    }

    /// Reverts the most recent entry that still has an effect. Returns
    /// whether anything was reverted.
    pub fn undo(
        &mut self,
        adapter: &mut SyncAdapter,
        model: &mut DocumentModel,
    ) -> Result<bool, CollabError> {
        while let Some(entry) = self.undo.pop_back() {
            if let Some(changes) = revert(&entry, adapter, model)? {
                self.redo.push(changes);
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn redo(
        &mut self,
        adapter: &mut SyncAdapter,
        model: &mut DocumentModel,
    ) -> Result<bool, CollabError> {
        while let Some(entry) = self.redo.pop() {
            if let Some(changes) = revert(&entry, adapter, model)? {
                self.undo.push_back(changes);
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

/// Applies the inverse of `entry`; `None` when nothing in it is still
/// in effect.
fn revert(
    entry: &[BlockChange],
    adapter: &mut SyncAdapter,
    model: &mut DocumentModel,
) -> Result<Option<Vec<BlockChange>>, CollabError> {
    let edits = inverse(entry, &adapter.shared_blocks());
    if edits.is_empty() {
        tracing::debug!(changes = entry.len(), "undo entry superseded by later writes");
        return Ok(None);
    }
    let changes = adapter.apply_history(edits, model)?;
    Ok((!changes.is_empty()).then_some(changes))
}

fn inverse(entry: &[BlockChange], blocks: &BTreeMap<OpId, SharedBlock>) -> Vec<BlockEdit> {
    entry
        .iter()
        .rev()
        .flat_map(|change| match change {
            BlockChange::Inserted { key, text } => match blocks.get(key) {
                None => Vec::new(),
                Some(block) if block.writers.iter().all(|peer| *peer == key.peer) => {
                    vec![BlockEdit::Delete { key: *key }]
                }
                // Others wrote into the block: take back only our text.
                Some(_) if !text.is_empty() => vec![BlockEdit::DeleteText {
                    key: *key,
                    atoms: text.clone(),
                }],
                Some(_) => Vec::new(),
            },
            BlockChange::Reshaped {
                key,
                before,
                version,
            } => blocks
                .get(key)
                .filter(|block| block.version == *version)
                .map(|_| BlockEdit::Reshape {
                    key: *key,
                    node: before.clone(),
                })
                .into_iter()
                .collect(),
            BlockChange::Retyped { key, patch } => {
                if !blocks.contains_key(key) {
                    return Vec::new();
                }
                let mut edits = Vec::new();
                if !patch.inserted.is_empty() {
                    edits.push(BlockEdit::DeleteText {
                        key: *key,
                        atoms: patch.inserted.clone(),
                    });
                }
                edits.extend(patch.removed.iter().map(|run| BlockEdit::InsertText {
                    key: *key,
                    after: Some(run.last),
                    content: run.content.clone(),
                }));
                edits
            }
            BlockChange::Deleted { key, before, anchor } => {
                // Restored only while nobody brought the block back.
                if blocks.contains_key(key) {
                    Vec::new()
                } else {
                    vec![BlockEdit::Insert {
                        after: *anchor,
                        nodes: vec![before.clone()],
                    }]
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::Node;
    use crate::sync::replica::{CharId, RemovedRun, TextPatch};
    use std::collections::BTreeSet;

    fn p(text: &str) -> Node {
        Node::paragraph(vec![Node::text(text)])
    }

    fn shared(key: OpId, version: OpId, writers: &[u64]) -> BTreeMap<OpId, SharedBlock> {
        BTreeMap::from([(
            key,
            SharedBlock {
                key,
                version,
                node: p("now"),
                writers: writers.iter().copied().collect::<BTreeSet<_>>(),
            },
        )])
    }

    #[test]
    fn test_untracked_origins_are_ignored() {
        let mut undo = UndoManager::new(vec![Origin::Local], 10);
        let change = BlockChange::Inserted {
            key: OpId::new(1, 1),
            text: Vec::new(),
        };
        undo.record(Origin::Remote, vec![change.clone()]);
        assert!(!undo.can_undo());
        undo.record(Origin::Local, vec![change]);
        assert!(undo.can_undo());
    }

    #[test]
    fn test_inverse_skips_overwritten_shell() {
        let key = OpId::new(1, 1);
        let entry = vec![BlockChange::Reshaped {
            key,
            before: p(""),
            version: OpId::new(1, 2),
        }];

        assert_eq!(
            inverse(&entry, &shared(key, OpId::new(1, 2), &[1])),
            vec![BlockEdit::Reshape { key, node: p("") }]
        );
        assert!(inverse(&entry, &shared(key, OpId::new(2, 1), &[1, 2])).is_empty());
    }

    #[test]
    fn test_inverse_of_insert_keeps_foreign_text() {
        let key = OpId::new(1, 1);
        let text = vec![CharId { op: key, index: 0 }];
        let entry = vec![BlockChange::Inserted {
            key,
            text: text.clone(),
        }];

        assert_eq!(
            inverse(&entry, &shared(key, key, &[1])),
            vec![BlockEdit::Delete { key }]
        );
        assert_eq!(
            inverse(&entry, &shared(key, key, &[1, 2])),
            vec![BlockEdit::DeleteText { key, atoms: text }]
        );
    }

    #[test]
    fn test_inverse_of_text_patch_restores_removed_runs() {
        let key = OpId::new(1, 1);
        let typed = CharId {
            op: OpId::new(1, 3),
            index: 0,
        };
        let last = CharId { op: key, index: 2 };
        let entry = vec![BlockChange::Retyped {
            key,
            patch: TextPatch {
                inserted: vec![typed],
                removed: vec![RemovedRun {
                    last,
                    content: vec![Node::text("bc")],
                }],
            },
        }];
        assert_eq!(
            inverse(&entry, &shared(key, key, &[1, 2])),
            vec![
                BlockEdit::DeleteText {
                    key,
                    atoms: vec![typed]
                },
                BlockEdit::InsertText {
                    key,
                    after: Some(last),
                    content: vec![Node::text("bc")]
                },
            ]
        );
        assert!(inverse(&entry, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_inverse_reverses_order() {
        let a = OpId::new(1, 1);
        let b = OpId::new(1, 2);
        let entry = vec![
            BlockChange::Deleted {
                key: a,
                before: p("a"),
                anchor: None,
            },
            BlockChange::Deleted {
                key: b,
                before: p("b"),
                anchor: Some(a),
            },
        ];
        let edits = inverse(&entry, &BTreeMap::new());
        assert_eq!(
            edits,
            vec![
                BlockEdit::Insert {
                    after: Some(a),
                    nodes: vec![p("b")]
                },
                BlockEdit::Insert {
                    after: None,
                    nodes: vec![p("a")]
                },
            ]
        );
    }
}
