//! Positions inside the tree and grapheme-aware inline editing helpers.
//!
//! A [`Position`] addresses a textblock by child-index path from the document
//! root, plus a grapheme offset into that textblock's inline content. Hard
//! breaks count as one grapheme.

use super::node::{Mark, Node, NodeKind};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub path: Vec<usize>,
    pub offset: usize,
}

impl Position {
    pub fn new(path: Vec<usize>, offset: usize) -> Self {
        Self { path, offset }
    }

    /// Parent container path and index of the addressed block.
    pub fn split_path(&self) -> Option<(&[usize], usize)> {
        let (last, parent) = self.path.split_last()?;
        Some((parent, *last))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub head: Position,
}

impl Selection {
    pub fn caret(at: Position) -> Self {
        Self {
            anchor: at.clone(),
            head: at,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }

    /// Start and end in document order.
    pub fn ordered(&self) -> (Position, Position) {
        let (a, b) = (&self.anchor, &self.head);
        if (&a.path, a.offset) <= (&b.path, b.offset) {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }
}

pub fn grapheme_len(text: &str) -> usize {
    text.graphemes(true).count()
}

pub(crate) fn grapheme_offset_to_byte(text: &str, grapheme_offset: usize) -> Option<usize> {
    if grapheme_offset == 0 {
        return Some(0);
    }

    let mut count = 0;
    for (byte_index, _) in text.grapheme_indices(true) {
        if count == grapheme_offset {
            return Some(byte_index);
        }
        count += 1;
    }
    if count == grapheme_offset {
        Some(text.len())
    } else {
        None
    }
}

fn inline_width(node: &Node) -> usize {
    match node.kind {
        NodeKind::Text => grapheme_len(node.text_str()),
        _ => 1,
    }
}

/// Length of inline content in graphemes.
pub fn inline_len(children: &[Node]) -> usize {
    children.iter().map(inline_width).sum()
}

/// Ensures a child boundary exists at `offset` and returns its index.
pub(crate) fn split_inline(children: &mut Vec<Node>, offset: usize) -> Option<usize> {
    let mut acc = 0;
    for index in 0..children.len() {
        if acc == offset {
            return Some(index);
        }
        let width = inline_width(&children[index]);
        if offset < acc + width {
            let node = &mut children[index];
            let text = node.text.take().unwrap_or_default();
            let byte = grapheme_offset_to_byte(&text, offset - acc)?;
            let (head, tail) = text.split_at(byte);
            node.text = Some(head.to_string());
            let rest = Node::text_with_marks(tail, node.marks.clone());
            children.insert(index + 1, rest);
            return Some(index + 1);
        }
        acc += width;
    }
    (acc == offset).then_some(children.len())
}

/// Drops empty text nodes and merges neighbours carrying identical marks.
pub(crate) fn normalize_inline(children: &mut Vec<Node>) {
    let mut merged: Vec<Node> = Vec::with_capacity(children.len());
    for child in children.drain(..) {
        if child.kind == NodeKind::Text && child.text_str().is_empty() {
            continue;
        }
        if let Some(last) = merged.last_mut()
            && last.kind == NodeKind::Text
            && child.kind == NodeKind::Text
            && last.marks == child.marks
        {
            last.text
                .get_or_insert_with(String::new)
                .push_str(child.text_str());
            continue;
        }
        merged.push(child);
    }
    *children = merged;
}

/// Marks a run typed at `index` inherits: those of the text node before it.
pub(crate) fn marks_before(children: &[Node], index: usize) -> Vec<Mark> {
    index
        .checked_sub(1)
        .and_then(|prev| children.get(prev))
        .filter(|node| node.kind == NodeKind::Text)
        .map(|node| node.marks.clone())
        .unwrap_or_default()
}

/// Turns inline content into something a code block accepts: unmarked text.
pub(crate) fn plain_inline(children: Vec<Node>) -> Vec<Node> {
    let text: String = children
        .iter()
        .map(|node| match node.kind {
            NodeKind::Text => node.text_str().to_string(),
            _ => "\n".to_string(),
        })
        .collect();
    if text.is_empty() {
        Vec::new()
    } else {
        vec![Node::text(text)]
    }
}
