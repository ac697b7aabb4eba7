//! Tab handling inside code blocks: indent or outdent the caret's line.

use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_TAB_UNIT: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabDirection {
    Indent,
    Outdent,
}

/// Edit to the code block text, in grapheme offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndentEdit {
    Insert { at: usize, text: String },
    Delete { from: usize, to: usize },
}

/// Computes the edit for a tab press with the caret at grapheme `caret` of
/// `code`. Returns `None` when there is nothing to outdent.
pub fn indent_edit(
    code: &str,
    caret: usize,
    unit: &str,
    direction: TabDirection,
) -> Option<IndentEdit> {
    let graphemes: Vec<&str> = code.graphemes(true).collect();
    if caret > graphemes.len() {
        return None;
    }
    let line_start = graphemes[..caret]
        .iter()
        .rposition(|g| *g == "\n")
        .map_or(0, |newline| newline + 1);

    match direction {
        TabDirection::Indent => Some(IndentEdit::Insert {
            at: line_start,
            text: unit.to_string(),
        }),
        TabDirection::Outdent => {
            let line = &graphemes[line_start..];
            let removable = if line.first() == Some(&"\t") {
                1
            } else {
                let width = unit.graphemes(true).count().max(1);
                line.iter().take(width).take_while(|g| **g == " ").count()
            };
            (removable > 0).then_some(IndentEdit::Delete {
                from: line_start,
                to: line_start + removable,
            })
        }
    }
}
