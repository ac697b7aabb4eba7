//! Transaction operations and their application to a node tree.
//!
//! Ops run against a working copy of the tree; the caller swaps it in only
//! after every op applied and the registry accepted the result.

use serde::{Deserialize, Serialize};

use super::Origin;
use super::node::{Attrs, Mark, MarkKind, Node, NodeKind};
use super::position::{
    Position, inline_len, marks_before, normalize_inline, plain_inline, split_inline,
};
use crate::error::DocError;
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Op {
    InsertText {
        at: Position,
        text: String,
    },
    DeleteRange {
        from: Position,
        to: Position,
    },
    SetBlockType {
        path: Vec<usize>,
        kind: NodeKind,
        attrs: Attrs,
    },
    WrapInBlock {
        parent: Vec<usize>,
        start: usize,
        end: usize,
        kind: NodeKind,
        attrs: Attrs,
    },
    SplitBlock {
        at: Position,
    },
    /// Merges the block at `path` into its previous sibling.
    MergeBlock {
        path: Vec<usize>,
    },
    SetMark {
        from: Position,
        to: Position,
        mark: Mark,
    },
    RemoveMark {
        from: Position,
        to: Position,
        kind: MarkKind,
    },
    ReplaceBlocks {
        parent: Vec<usize>,
        start: usize,
        end: usize,
        blocks: Vec<Node>,
    },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InsertText { .. } => "insertText",
            Self::DeleteRange { .. } => "deleteRange",
            Self::SetBlockType { .. } => "setBlockType",
            Self::WrapInBlock { .. } => "wrapInBlock",
            Self::SplitBlock { .. } => "splitBlock",
            Self::MergeBlock { .. } => "mergeBlock",
            Self::SetMark { .. } => "setMark",
            Self::RemoveMark { .. } => "removeMark",
            Self::ReplaceBlocks { .. } => "replaceBlocks",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub origin: Origin,
    pub ops: Vec<Op>,
}

impl Transaction {
    pub fn new(origin: Origin, ops: Vec<Op>) -> Self {
        Self { origin, ops }
    }

    pub fn local(ops: Vec<Op>) -> Self {
        Self::new(Origin::Local, ops)
    }
}

/// Applies `ops` to a copy of `root`, validating after each op.
pub(crate) fn apply_ops(registry: &Registry, root: &Node, ops: &[Op]) -> Result<Node, DocError> {
    let mut working = root.clone();
    for (index, op) in ops.iter().enumerate() {
        let label = format!("{}#{index}", op.name());
        apply_op(registry, &mut working, op)
            .map_err(|reason| DocError::violation(&label, reason))?;
        registry.validate_for(&label, &working)?;
    }
    Ok(working)
}

type OpResult = Result<(), String>;

fn apply_op(registry: &Registry, root: &mut Node, op: &Op) -> OpResult {
    match op {
        Op::InsertText { at, text } => insert_text(root, at, text),
        Op::DeleteRange { from, to } => delete_range(root, from, to),
        Op::SetBlockType { path, kind, attrs } => {
            set_block_type(registry, root, path, *kind, attrs)
        }
        Op::WrapInBlock {
            parent,
            start,
            end,
            kind,
            attrs,
        } => wrap_in_block(registry, root, parent, *start..*end, *kind, attrs),
        Op::SplitBlock { at } => split_block(root, at),
        Op::MergeBlock { path } => merge_block(root, path),
        Op::SetMark { from, to, mark } => {
            registry
                .mark_spec(mark.kind())
                .map_err(|err| err.to_string())?;
            edit_marks(root, from, to, |marks| {
                marks.retain(|existing| existing.kind() != mark.kind());
                marks.push(mark.clone());
                marks.sort_by_key(Mark::kind);
            })
        }
        Op::RemoveMark { from, to, kind } => edit_marks(root, from, to, |marks| {
            marks.retain(|existing| existing.kind() != *kind);
        }),
        Op::ReplaceBlocks {
            parent,
            start,
            end,
            blocks,
        } => {
            let container = container_mut(root, parent)?;
            if start > end || *end > container.children.len() {
                return Err(format!(
                    "range {start}..{end} out of bounds for {} children",
                    container.children.len()
                ));
            }
            container.children.splice(*start..*end, blocks.iter().cloned());
            Ok(())
        }
    }
}

fn container_mut<'a>(root: &'a mut Node, path: &[usize]) -> Result<&'a mut Node, String> {
    root.descendant_mut(path)
        .ok_or_else(|| format!("no node at path {path:?}"))
}

fn textblock_mut<'a>(root: &'a mut Node, path: &[usize]) -> Result<&'a mut Node, String> {
    let node = container_mut(root, path)?;
    if node.is_textblock() {
        Ok(node)
    } else {
        Err(format!("{} at {path:?} is not a textblock", node.kind))
    }
}

fn insert_text(root: &mut Node, at: &Position, text: &str) -> OpResult {
    let block = textblock_mut(root, &at.path)?;
    if text.is_empty() {
        return Ok(());
    }
    let index = split_inline(&mut block.children, at.offset)
        .ok_or_else(|| format!("offset {} past end of block", at.offset))?;
    let marks = if block.kind == NodeKind::CodeBlock {
        Vec::new()
    } else {
        marks_before(&block.children, index)
    };
    block
        .children
        .insert(index, Node::text_with_marks(text, marks));
    normalize_inline(&mut block.children);
    Ok(())
}

/// Where a range starts and ends, resolved to sibling textblocks.
struct Span<'p> {
    parent: &'p [usize],
    first: usize,
    last: usize,
}

fn resolve_span<'p>(from: &'p Position, to: &'p Position) -> Result<Span<'p>, String> {
    let (from_parent, first) = from.split_path().ok_or("range starts at the root")?;
    let (to_parent, last) = to.split_path().ok_or("range ends at the root")?;
    if from_parent != to_parent {
        return Err("range must stay within sibling textblocks".into());
    }
    if (first, from.offset) > (last, to.offset) {
        return Err("range end precedes its start".into());
    }
    Ok(Span {
        parent: from_parent,
        first,
        last,
    })
}

/// Splits inline content at both offsets and returns the child index range
/// between them. The start split goes first so the end index stays valid.
fn split_range(
    children: &mut Vec<Node>,
    from: usize,
    to: usize,
) -> Result<(usize, usize), String> {
    let start = split_inline(children, from).ok_or("range start past end of block")?;
    let end = split_inline(children, to).ok_or("range end past end of block")?;
    Ok((start, end))
}

fn delete_range(root: &mut Node, from: &Position, to: &Position) -> OpResult {
    let span = resolve_span(from, to)?;
    let container = container_mut(root, span.parent)?;
    for index in span.first..=span.last {
        match container.children.get(index) {
            Some(node) if node.is_textblock() => {}
            _ => return Err(format!("block {index} in range is not a textblock")),
        }
    }

    if span.first == span.last {
        let block = &mut container.children[span.first];
        let (start, end) = split_range(&mut block.children, from.offset, to.offset)?;
        block.children.drain(start..end);
        normalize_inline(&mut block.children);
        return Ok(());
    }

    let mut last = container.children.remove(span.last);
    let cut = split_inline(&mut last.children, to.offset).ok_or("range end past end of block")?;
    let tail: Vec<Node> = last.children.drain(cut..).collect();
    container.children.drain(span.first + 1..span.last);

    let first = &mut container.children[span.first];
    let keep = split_inline(&mut first.children, from.offset)
        .ok_or("range start past end of block")?;
    first.children.truncate(keep);
    if first.kind == NodeKind::CodeBlock {
        first.children.extend(plain_inline(tail));
    } else {
        first.children.extend(tail);
    }
    normalize_inline(&mut first.children);
    Ok(())
}

fn set_block_type(
    registry: &Registry,
    root: &mut Node,
    path: &[usize],
    kind: NodeKind,
    attrs: &Attrs,
) -> OpResult {
    registry
        .node_spec(kind)
        .map_err(|_| format!("kind `{kind}` is not registered"))?;
    if !kind.is_textblock() {
        return Err(format!("{kind} is not a textblock kind"));
    }
    let block = textblock_mut(root, path)?;
    if kind == NodeKind::CodeBlock {
        block.children = plain_inline(std::mem::take(&mut block.children));
    }
    block.kind = kind;
    block.attrs = attrs.clone();
    Ok(())
}

fn wrap_in_block(
    registry: &Registry,
    root: &mut Node,
    parent: &[usize],
    range: std::ops::Range<usize>,
    kind: NodeKind,
    attrs: &Attrs,
) -> OpResult {
    registry
        .node_spec(kind)
        .map_err(|_| format!("kind `{kind}` is not registered"))?;
    let container = container_mut(root, parent)?;
    if range.start >= range.end || range.end > container.children.len() {
        return Err(format!(
            "range {}..{} out of bounds for {} children",
            range.start,
            range.end,
            container.children.len()
        ));
    }
    let wrapped: Vec<Node> = container.children.drain(range.clone()).collect();
    let children = if kind.is_list() {
        wrapped
            .into_iter()
            .map(|block| Node::list_item(vec![block]))
            .collect()
    } else {
        wrapped
    };
    container
        .children
        .insert(range.start, Node::new(kind, attrs.clone(), children));
    Ok(())
}

fn split_block(root: &mut Node, at: &Position) -> OpResult {
    let (parent_path, index) = at.split_path().ok_or("cannot split the root")?;
    let parent = container_mut(root, parent_path)?;
    let block = parent
        .children
        .get_mut(index)
        .filter(|node| node.is_textblock())
        .ok_or_else(|| format!("no textblock at {:?}", at.path))?;

    let at_end = at.offset == inline_len(&block.children);
    let cut = split_inline(&mut block.children, at.offset).ok_or("offset past end of block")?;
    let tail: Vec<Node> = block.children.drain(cut..).collect();
    let new_block = if block.kind == NodeKind::Heading && at_end {
        Node::paragraph(tail)
    } else {
        Node::new(block.kind, block.attrs.clone(), tail)
    };

    // The first paragraph of a list item splits the item itself.
    if parent.kind == NodeKind::ListItem && index == 0 {
        let Some((item_index, item_path)) = parent_path.split_last() else {
            return Err("list item without a list".into());
        };
        let list = container_mut(root, item_path)?;
        let item = &mut list.children[*item_index];
        let mut moved = vec![new_block];
        moved.extend(item.children.drain(1..));
        list.children.insert(item_index + 1, Node::list_item(moved));
        return Ok(());
    }

    parent.children.insert(index + 1, new_block);
    Ok(())
}

fn merge_block(root: &mut Node, path: &[usize]) -> OpResult {
    let (index, parent_path) = path.split_last().ok_or("cannot merge the root")?;
    if *index == 0 {
        return Err("no previous sibling to merge into".into());
    }
    let parent = container_mut(root, parent_path)?;
    if *index >= parent.children.len() {
        return Err(format!("no node at path {path:?}"));
    }
    let previous_kind = parent.children[index - 1].kind;
    let current_kind = parent.children[*index].kind;

    if previous_kind.is_textblock() && current_kind.is_textblock() {
        let current = parent.children.remove(*index);
        let previous = &mut parent.children[index - 1];
        if previous.kind == NodeKind::CodeBlock {
            previous.children.extend(plain_inline(current.children));
        } else {
            previous.children.extend(current.children);
        }
        normalize_inline(&mut previous.children);
        Ok(())
    } else if previous_kind == current_kind && current_kind != NodeKind::Text {
        let current = parent.children.remove(*index);
        parent.children[index - 1].children.extend(current.children);
        Ok(())
    } else {
        Err(format!("cannot merge {current_kind} into {previous_kind}"))
    }
}

fn edit_marks(
    root: &mut Node,
    from: &Position,
    to: &Position,
    mut edit: impl FnMut(&mut Vec<Mark>),
) -> OpResult {
    let span = resolve_span(from, to)?;
    let container = container_mut(root, span.parent)?;
    for index in span.first..=span.last {
        let block = container
            .children
            .get_mut(index)
            .filter(|node| node.is_textblock())
            .ok_or_else(|| format!("block {index} in range is not a textblock"))?;
        let start = if index == span.first { from.offset } else { 0 };
        let end = if index == span.last {
            to.offset
        } else {
            inline_len(&block.children)
        };
        let (start_index, end_index) = split_range(&mut block.children, start, end)?;
        for node in &mut block.children[start_index..end_index] {
            if node.kind == NodeKind::Text {
                edit(&mut node.marks);
            }
        }
        normalize_inline(&mut block.children);
    }
    Ok(())
}
