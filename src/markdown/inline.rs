//! Inline content: mark-aware parsing of inline tokens and rendering of
//! text runs with delimiters, escapes, and code spans.
//!
//! Emphasis delimiters only survive a round trip when CommonMark's flanking
//! rules let them open and close. Rendering falls back to the mark's HTML
//! form whenever a delimiter would sit next to punctuation, and parsing
//! maps those tags back to marks.

use crate::error::DocError;
use crate::model::node::{Mark, MarkKind, Node, NodeKind};
use crate::model::position::normalize_inline;
use crate::registry::Registry;

use super::token::{Inline, InlineTag};

const BREAK_TAGS: [&str; 3] = ["<br>", "<br/>", "<br />"];
const HTML_BREAK: &str = "<br>";
const ESCAPED_BREAK: &str = "\\\n";

pub(crate) fn parse_inline(registry: &Registry, items: &[Inline]) -> Result<Vec<Node>, DocError> {
    let mut out = Vec::new();
    let mut marks = Vec::new();
    let mut tags = Vec::new();
    collect(registry, items, &mut marks, &mut tags, &mut out)?;
    normalize_inline(&mut out);
    Ok(out)
}

fn current_marks(marks: &[Mark], tags: &[Mark], extra: Option<Mark>) -> Vec<Mark> {
    let mut all = marks.to_vec();
    all.extend(tags.iter().cloned());
    all.extend(extra);
    all.sort_by_key(Mark::kind);
    all.dedup_by_key(|mark| mark.kind());
    all
}

/// Marks that carry no attributes and can be opened by a bare tag.
fn plain_mark(kind: MarkKind) -> Option<Mark> {
    match kind {
        MarkKind::Bold => Some(Mark::Bold),
        MarkKind::Italic => Some(Mark::Italic),
        MarkKind::Strike => Some(Mark::Strike),
        MarkKind::Underline => Some(Mark::Underline),
        MarkKind::Code => Some(Mark::Code),
        MarkKind::Link => None,
    }
}

/// `tags` holds marks opened by inline HTML that are still unclosed.
fn collect(
    registry: &Registry,
    items: &[Inline],
    marks: &mut Vec<Mark>,
    tags: &mut Vec<Mark>,
    out: &mut Vec<Node>,
) -> Result<(), DocError> {
    for item in items {
        match item {
            Inline::Text(text) | Inline::Raw(text) => {
                out.push(Node::text_with_marks(text, current_marks(marks, tags, None)));
            }
            Inline::Code(text) => {
                registry.mark_spec(MarkKind::Code)?;
                out.push(Node::text_with_marks(
                    text,
                    current_marks(marks, tags, Some(Mark::Code)),
                ));
            }
            Inline::SoftBreak => {
                out.push(Node::text_with_marks("\n", current_marks(marks, tags, None)));
            }
            Inline::HardBreak => {
                registry.node_spec(NodeKind::HardBreak)?;
                out.push(Node::hard_break());
            }
            Inline::Html(html) => {
                let tag = html.trim().to_ascii_lowercase();
                if BREAK_TAGS.contains(&tag.as_str()) {
                    registry.node_spec(NodeKind::HardBreak)?;
                    out.push(Node::hard_break());
                    continue;
                }
                let handled = match registry.mark_for_tag(&tag) {
                    Some((kind, false)) => match plain_mark(kind) {
                        Some(mark) => {
                            tags.push(mark);
                            true
                        }
                        None => false,
                    },
                    Some((kind, true)) => match tags.iter().rposition(|mark| mark.kind() == kind) {
                        Some(index) => {
                            tags.remove(index);
                            true
                        }
                        None => false,
                    },
                    None => false,
                };
                if !handled {
                    out.push(Node::text_with_marks(html, current_marks(marks, tags, None)));
                }
            }
            Inline::Span { tag, children } => {
                let mark = match tag {
                    InlineTag::Emphasis => Mark::Italic,
                    InlineTag::Strong => Mark::Bold,
                    InlineTag::Strikethrough => Mark::Strike,
                    InlineTag::Link { href, title } => Mark::Link {
                        href: href.clone(),
                        title: title.clone(),
                    },
                };
                registry.mark_spec(mark.kind())?;
                marks.push(mark);
                collect(registry, children, marks, tags, out)?;
                marks.pop();
            }
        }
    }
    Ok(())
}

/// Rendering flags for one inline run.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct InlineStyle {
    /// Newlines are not allowed (headings, table cells).
    pub single_line: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece<'a> {
    Open(usize),
    Close(usize),
    Text { text: &'a str, block_end: bool },
    Code(&'a str),
    Break { escaped: bool },
}

/// One rendered mark span and the form it is written in.
struct Span<'a> {
    mark: &'a Mark,
    open: String,
    close: String,
    /// Delimiter character subject to flanking rules (`*`, `_`, `~`).
    run: Option<char>,
    html: Option<(&'static str, &'static str)>,
    /// Delimiters open and close where they stand.
    fits: bool,
}

impl<'a> Span<'a> {
    fn new(registry: &Registry, mark: &'a Mark) -> Self {
        let (open, close, html) = match registry.mark_spec(mark.kind()) {
            Ok(spec) => ((spec.open)(mark), (spec.close)(mark), spec.html),
            Err(_) => (String::new(), String::new(), None),
        };
        let run = open
            .chars()
            .next()
            .filter(|ch| matches!(ch, '*' | '_' | '~'));
        Self {
            mark,
            open,
            close,
            run,
            html,
            fits: true,
        }
    }

    fn uses_html(&self) -> bool {
        !self.fits && self.html.is_some()
    }

    fn opening(&self) -> &str {
        match self.html {
            Some((open, _)) if self.uses_html() => open,
            _ => &self.open,
        }
    }

    fn closing(&self) -> &str {
        match self.html {
            Some((_, close)) if self.uses_html() => close,
            _ => &self.close,
        }
    }
}

pub(crate) fn render_inline(registry: &Registry, children: &[Node], style: InlineStyle) -> String {
    let (pieces, mut spans) = layout(registry, children, style);
    choose_forms(&pieces, &mut spans);

    let mut out = String::new();
    for piece in &pieces {
        match *piece {
            Piece::Open(id) => {
                let open = spans[id].opening();
                if open.starts_with('[') {
                    guard_image_bang(&mut out);
                }
                out.push_str(open);
            }
            Piece::Close(id) => out.push_str(spans[id].closing()),
            Piece::Text { text, block_end } => push_text(&mut out, text, style, block_end),
            Piece::Code(text) => out.push_str(&code_span(text, style)),
            Piece::Break { escaped } => {
                out.push_str(if escaped { ESCAPED_BREAK } else { HTML_BREAK });
            }
        }
    }
    out
}

/// Flattens inline nodes into pieces, keeping marks shared by neighbours
/// open across them and moving outer whitespace outside the delimiters.
fn layout<'a>(
    registry: &Registry,
    children: &'a [Node],
    style: InlineStyle,
) -> (Vec<Piece<'a>>, Vec<Span<'a>>) {
    let mut pieces = Vec::new();
    let mut spans: Vec<Span<'a>> = Vec::new();
    let mut active: Vec<usize> = Vec::new();

    let close_to = |pieces: &mut Vec<Piece<'a>>, active: &mut Vec<usize>, keep: usize| {
        while active.len() > keep {
            if let Some(id) = active.pop() {
                pieces.push(Piece::Close(id));
            }
        }
    };
    let push = |pieces: &mut Vec<Piece<'a>>, text: &'a str, block_end: bool| {
        if !text.is_empty() {
            pieces.push(Piece::Text { text, block_end });
        }
    };

    for (index, node) in children.iter().enumerate() {
        if node.kind != NodeKind::Text {
            close_to(&mut pieces, &mut active, 0);
            let is_text = |at: Option<&Node>| at.is_some_and(|node| node.kind == NodeKind::Text);
            let between_text = index
                .checked_sub(1)
                .is_some_and(|prev| is_text(children.get(prev)))
                && is_text(children.get(index + 1));
            pieces.push(Piece::Break {
                escaped: !style.single_line && between_text,
            });
            continue;
        }

        let text = node.text_str();
        let code = node.has_mark(MarkKind::Code);
        let (lead, core, trail) = if code {
            ("", text, "")
        } else {
            split_whitespace(text)
        };
        let wanted = delimited(node);
        let current: Vec<&Mark> = active.iter().map(|id| spans[*id].mark).collect();
        let keep = common_prefix(&current, &wanted);
        let marks: Vec<&Mark> = if core.is_empty() {
            current[..keep].to_vec()
        } else {
            wanted
        };

        close_to(&mut pieces, &mut active, keep.min(marks.len()));

        let next_keep = children
            .get(index + 1)
            .map(|next| common_prefix(&marks, &delimited(next)))
            .unwrap_or(0);
        let opening = marks.len() > active.len();
        let closing = marks.len() > next_keep;
        let last = index + 1 == children.len();

        let (lead, body, trail) = match (opening, closing) {
            _ if code => ("", text, ""),
            (true, true) => (lead, core, trail),
            (true, false) => (lead, &text[lead.len()..], ""),
            (false, true) => ("", &text[..text.len() - trail.len()], trail),
            (false, false) => ("", text, ""),
        };

        push(&mut pieces, lead, last && body.is_empty() && trail.is_empty());
        for mark in &marks[active.len()..] {
            active.push(spans.len());
            pieces.push(Piece::Open(spans.len()));
            spans.push(Span::new(registry, *mark));
        }

        if code {
            pieces.push(Piece::Code(body));
        } else {
            push(&mut pieces, body, last && trail.is_empty());
        }

        close_to(&mut pieces, &mut active, next_keep);
        push(&mut pieces, trail, last);
    }

    close_to(&mut pieces, &mut active, 0);
    (pieces, spans)
}

/// Decides delimiter or HTML form per span, innermost first. Delimiters are
/// kept when both inner edges are alphanumeric, which makes them flanking
/// on the inside whatever surrounds them. A nested span at the edge that
/// uses the same delimiter character merges into one run and counts by its
/// own inner edge.
fn choose_forms(pieces: &[Piece<'_>], spans: &mut [Span<'_>]) {
    let mut starts = vec![0usize; spans.len()];
    for (index, piece) in pieces.iter().enumerate() {
        match *piece {
            Piece::Open(id) => starts[id] = index,
            Piece::Close(id) => {
                let Some(run) = spans[id].run else {
                    continue;
                };
                let first = pieces.get(starts[id] + 1);
                let last = index.checked_sub(1).and_then(|before| pieces.get(before));
                let fits = edge_fits(first, true, run, spans) && edge_fits(last, false, run, spans);
                spans[id].fits = fits;
            }
            _ => {}
        }
    }
}

fn edge_fits(piece: Option<&Piece<'_>>, leading: bool, run: char, spans: &[Span<'_>]) -> bool {
    match piece {
        Some(Piece::Text { text, .. }) => {
            let edge = if leading {
                text.chars().next()
            } else {
                text.chars().next_back()
            };
            edge.is_some_and(char::is_alphanumeric)
        }
        Some(Piece::Open(inner)) if leading => {
            spans[*inner].run == Some(run) && spans[*inner].fits
        }
        Some(Piece::Close(inner)) if !leading => {
            spans[*inner].run == Some(run) && spans[*inner].fits
        }
        _ => false,
    }
}

/// `!` right before `[` would turn a link into an image.
fn guard_image_bang(out: &mut String) {
    let escaped = match out.strip_suffix('!') {
        Some(head) => head.chars().rev().take_while(|ch| *ch == '\\').count() % 2 == 1,
        None => return,
    };
    if !escaped {
        out.pop();
        out.push_str("\\!");
    }
}

/// Marks rendered as surrounding delimiters; inline code is emitted as a span.
fn delimited(node: &Node) -> Vec<&Mark> {
    node.marks
        .iter()
        .filter(|mark| mark.kind() != MarkKind::Code)
        .collect()
}

fn common_prefix(left: &[&Mark], right: &[&Mark]) -> usize {
    left.iter()
        .zip(right)
        .take_while(|(a, b)| a == b)
        .count()
}

fn split_whitespace(text: &str) -> (&str, &str, &str) {
    let trimmed_start = text.trim_start();
    let lead = &text[..text.len() - trimmed_start.len()];
    let core = trimmed_start.trim_end();
    let trail = &trimmed_start[core.len()..];
    (lead, core, trail)
}

fn push_text(out: &mut String, text: &str, style: InlineStyle, block_end: bool) {
    if text.is_empty() {
        return;
    }
    let text = if style.single_line {
        text.replace('\n', " ")
    } else {
        text.to_string()
    };
    let line_start = out.is_empty() || out.ends_with('\n');
    out.push_str(&escape_text(&text, line_start, block_end));
}

/// Escapes markdown syntax so the text parses back to itself.
pub(crate) fn escape_text(text: &str, line_start: bool, block_end: bool) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut at_line_start = line_start;
    let mut leading = line_start;
    let mut digits_only = line_start;

    for (index, ch) in chars.iter().copied().enumerate() {
        let next = chars.get(index + 1).copied();
        match ch {
            '\n' => {
                out.push('\n');
                at_line_start = true;
                leading = true;
                digits_only = true;
                continue;
            }
            ' ' | '\t' if leading => {
                out.push_str(if ch == ' ' { "&#32;" } else { "&#9;" });
                continue;
            }
            ' ' | '\t' if next == Some('\n') || (next.is_none() && block_end) => {
                out.push_str(if ch == ' ' { "&#32;" } else { "&#9;" });
            }
            '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' | '~' | '|' | '&' => {
                out.push('\\');
                out.push(ch);
            }
            '#' | '-' | '+' | '=' if at_line_start => {
                out.push('\\');
                out.push(ch);
            }
            '.' | ')' if digits_only && !at_line_start => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
        if !ch.is_ascii_digit() {
            digits_only = false;
        }
        at_line_start = false;
        leading = false;
    }
    out
}

fn code_span(text: &str, style: InlineStyle) -> String {
    let text = if style.single_line {
        text.replace('\n', " ")
    } else {
        text.to_string()
    };
    let mut longest = 0;
    let mut run = 0;
    for ch in text.chars() {
        if ch == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    let fence = "`".repeat(longest + 1);
    let pad = text.starts_with('`')
        || text.ends_with('`')
        || (text.starts_with(' ') && text.ends_with(' ') && !text.trim().is_empty());
    let text = if style.single_line {
        text.replace('|', "\\|")
    } else {
        text
    };
    if pad {
        format!("{fence} {text} {fence}")
    } else {
        format!("{fence}{text}{fence}")
    }
}
