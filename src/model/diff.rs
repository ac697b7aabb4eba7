//! Minimal changed range between two trees.

use serde::{Deserialize, Serialize};

use super::node::Node;

/// Children `start..old_end` of the node at `parent` were replaced by
/// children `start..new_end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRange {
    pub parent: Vec<usize>,
    pub start: usize,
    pub old_end: usize,
    pub new_end: usize,
}

impl ChangeRange {
    /// Top-level block indices touched in the old and new tree.
    pub fn top_level(&self) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        match self.parent.first() {
            Some(index) => (*index..index + 1, *index..index + 1),
            None => (self.start..self.old_end, self.start..self.new_end),
        }
    }
}

/// Returns `None` when the trees are equal.
pub fn diff(old: &Node, new: &Node) -> Option<ChangeRange> {
    if old == new {
        return None;
    }
    let mut path = Vec::new();
    let mut old = old;
    let mut new = new;
    loop {
        let (prefix, suffix) = common_ends(&old.children, &new.children);
        let old_end = old.children.len() - suffix;
        let new_end = new.children.len() - suffix;

        // Descend while exactly one child changed in place and kept its shape.
        if old_end == prefix + 1 && new_end == prefix + 1 {
            let (o, n) = (&old.children[prefix], &new.children[prefix]);
            if o.kind == n.kind && o.attrs == n.attrs && !o.kind.is_inline() && !o.is_textblock()
            {
                path.push(prefix);
                old = o;
                new = n;
                continue;
            }
        }

        return Some(ChangeRange {
            parent: path,
            start: prefix,
            old_end,
            new_end,
        });
    }
}

fn common_ends(old: &[Node], new: &[Node]) -> (usize, usize) {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    (prefix, suffix)
}
