//! Plain-text paste routing.
//!
//! Pasted text is tokenized with the codec's tokenizer. Text that contains a
//! table is parsed into blocks and inserted structurally; a pasted bare URL
//! becomes a link when the registry carries a paste-pattern rule. Anything
//! else, including every failure, is left to the host's literal paste.

use serde::Serialize;

use crate::error::DocError;
use crate::markdown::MarkdownCodec;
use crate::model::node::{Mark, Node, NodeKind};
use crate::model::position::{Position, Selection, grapheme_len};
use crate::model::transaction::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PasteOutcome {
    /// The paste was applied; the host must not insert the text itself.
    Handled,
    /// The host should fall through to literal insertion.
    NotHandled,
}

/// How a paste is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PastePlan {
    Blocks(Vec<Node>),
    Link { href: String },
}

/// Whether `text` contains at least one table as the codec tokenizes it.
pub fn detect_table(codec: &MarkdownCodec, text: &str) -> Result<bool, DocError> {
    let tokens = codec.tokenize(text)?;
    Ok(tokens.iter().any(|token| token.contains_table()))
}

/// Decides how to apply `text`; `None` means literal paste.
pub fn plan(codec: &MarkdownCodec, text: &str) -> Result<Option<PastePlan>, DocError> {
    let tokens = codec.tokenize(text)?;
    if tokens.iter().any(|token| token.contains_table()) {
        let blocks = codec.parse_tokens(&tokens)?;
        return Ok(Some(PastePlan::Blocks(blocks)));
    }
    Ok(codec
        .registry()
        .input_rules()
        .find_map(|rule| rule.pasted(text))
        .map(|href| PastePlan::Link { href }))
}

/// Turns a plan into ops against `root` with the given selection.
///
/// Blocks go after the top-level block holding the caret, replacing it when
/// it is an empty paragraph, or at the end without a selection. A link
/// wraps a non-empty selection or is inserted at the caret.
pub fn ops_for(plan: PastePlan, root: &Node, selection: Option<&Selection>) -> Option<Vec<Op>> {
    match plan {
        PastePlan::Blocks(blocks) => {
            if blocks.is_empty() {
                return None;
            }
            let count = root.children.len();
            let (start, end) = match selection.and_then(|s| s.head.path.first().copied()) {
                Some(index) if index < count => {
                    let current = &root.children[index];
                    if current.kind == NodeKind::Paragraph && current.children.is_empty() {
                        (index, index + 1)
                    } else {
                        (index + 1, index + 1)
                    }
                }
                _ => (count, count),
            };
            Some(vec![Op::ReplaceBlocks {
                parent: Vec::new(),
                start,
                end,
                blocks,
            }])
        }
        PastePlan::Link { href } => {
            let selection = selection?;
            if selection.is_collapsed() {
                let at = selection.head.clone();
                let to = Position::new(at.path.clone(), at.offset + grapheme_len(&href));
                Some(vec![
                    Op::InsertText {
                        at: at.clone(),
                        text: href.clone(),
                    },
                    Op::SetMark {
                        from: at,
                        to,
                        mark: Mark::link(href),
                    },
                ])
            } else {
                let (from, to) = selection.ordered();
                Some(vec![Op::SetMark {
                    from,
                    to,
                    mark: Mark::link(href),
                }])
            }
        }
    }
}
