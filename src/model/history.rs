//! Snapshot undo history for single-user editing.

use std::collections::VecDeque;

use super::node::Node;

#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<Node>,
    redo: Vec<Node>,
    depth: usize,
}

impl History {
    pub fn new(depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            depth,
        }
    }

    /// Records the tree as it was before a local change. New changes clear
    /// the redo stack; the oldest entry drops once `depth` is reached.
    pub fn record(&mut self, before: Node) {
        if self.depth == 0 {
            return;
        }
        if self.undo.len() == self.depth {
            self.undo.pop_front();
        }
        self.undo.push_back(before);
        self.redo.clear();
    }

    /// Returns the tree to restore, remembering `current` for redo.
    pub fn undo(&mut self, current: Node) -> Option<Node> {
        let previous = self.undo.pop_back()?;
        self.redo.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: Node) -> Option<Node> {
        let next = self.redo.pop()?;
        self.undo.push_back(current);
        Some(next)
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

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Node {
        Node::doc(vec![Node::paragraph(vec![Node::text(text)])])
    }

    #[test]
    fn test_undo_redo_cycle() {
        let mut history = History::new(10);
        history.record(doc("a"));
        assert_eq!(history.undo(doc("b")), Some(doc("a")));
        assert_eq!(history.redo(doc("a")), Some(doc("b")));
        assert!(history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn test_depth_bound() {
        let mut history = History::new(2);
        history.record(doc("1"));
        history.record(doc("2"));
        history.record(doc("3"));
        assert_eq!(history.undo(doc("4")), Some(doc("3")));
        assert_eq!(history.undo(doc("3")), Some(doc("2")));
        assert_eq!(history.undo(doc("2")), None);
    }

    #[test]
    fn test_record_clears_redo() {
        let mut history = History::new(4);
        history.record(doc("a"));
        history.undo(doc("b"));
        history.record(doc("a"));
        assert!(!history.can_redo());
    }
}
