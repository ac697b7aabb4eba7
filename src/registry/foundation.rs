//! The foundation descriptor set: every node and mark kind a single-user
//! editor supports, plus tab indentation inside code blocks.

use crate::error::DocError;
use crate::markdown::{Inline, ParseContext, RenderContext, Token, TokenKind};
use crate::model::node::{DEFAULT_CODE_LANGUAGE, Mark, MarkKind, Node, NodeKind};

use super::indent::DEFAULT_TAB_UNIT;
use super::link::InputRule;
use super::{AttrRule, Behavior, ContentRule, ExtensionDescriptor, MarkSpec, NodeSpec};

const MAX_HEADING_LEVEL: u8 = 3;
/// An empty paragraph has no markdown of its own.
const EMPTY_PARAGRAPH: &str = "<p></p>";
/// Keeps a header row whose cells are all empty from reading as no header.
const EMPTY_CELL: &str = "<!-- -->";

pub fn compose_foundation() -> Vec<ExtensionDescriptor> {
    let nodes = [
        NodeSpec {
            kind: NodeKind::Document,
            block: false,
            content: ContentRule::Blocks { min: 0 },
            attrs: AttrRule::None,
            parse: None,
            render: render_document,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::Paragraph,
            block: true,
            content: ContentRule::Inline,
            attrs: AttrRule::None,
            parse: Some(parse_paragraph),
            render: render_paragraph,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::Heading,
            block: true,
            content: ContentRule::Inline,
            attrs: AttrRule::HeadingLevel {
                min: 1,
                max: MAX_HEADING_LEVEL,
            },
            parse: Some(parse_heading),
            render: render_heading,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::BulletList,
            block: true,
            content: ContentRule::Only {
                kinds: &[NodeKind::ListItem],
                min: 1,
            },
            attrs: AttrRule::None,
            parse: Some(parse_list),
            render: render_list,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::OrderedList,
            block: true,
            content: ContentRule::Only {
                kinds: &[NodeKind::ListItem],
                min: 1,
            },
            attrs: AttrRule::Start,
            parse: Some(parse_list),
            render: render_list,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::ListItem,
            block: false,
            content: ContentRule::ParagraphFirst,
            attrs: AttrRule::None,
            parse: Some(parse_list_item),
            render: render_list_item,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::Blockquote,
            block: true,
            content: ContentRule::Blocks { min: 1 },
            attrs: AttrRule::None,
            parse: Some(parse_blockquote),
            render: render_blockquote,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::CodeBlock,
            block: true,
            content: ContentRule::PlainText,
            attrs: AttrRule::Language,
            parse: Some(parse_code_block),
            render: render_code_block,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::Table,
            block: true,
            content: ContentRule::Only {
                kinds: &[NodeKind::TableRow],
                min: 0,
            },
            attrs: AttrRule::None,
            parse: Some(parse_table),
            render: render_table,
            check: Some(check_table),
        },
        NodeSpec {
            kind: NodeKind::TableRow,
            block: false,
            content: ContentRule::Only {
                kinds: &[NodeKind::TableCell, NodeKind::TableHeaderCell],
                min: 1,
            },
            attrs: AttrRule::None,
            parse: None,
            render: render_table_row,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::TableCell,
            block: false,
            content: ContentRule::SingleParagraph,
            attrs: AttrRule::None,
            parse: None,
            render: render_cell,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::TableHeaderCell,
            block: false,
            content: ContentRule::SingleParagraph,
            attrs: AttrRule::None,
            parse: None,
            render: render_cell,
            check: None,
        },
        NodeSpec {
            kind: NodeKind::HorizontalRule,
            block: true,
            content: ContentRule::Leaf,
            attrs: AttrRule::None,
            parse: Some(parse_rule),
            render: |_, _| "---".to_string(),
            check: None,
        },
        NodeSpec {
            kind: NodeKind::HardBreak,
            block: false,
            content: ContentRule::Leaf,
            attrs: AttrRule::None,
            parse: None,
            render: |ctx, node| ctx.render_inline(std::slice::from_ref(node)),
            check: None,
        },
        NodeSpec {
            kind: NodeKind::Text,
            block: false,
            content: ContentRule::Leaf,
            attrs: AttrRule::None,
            parse: None,
            render: |ctx, node| ctx.render_inline(std::slice::from_ref(node)),
            check: None,
        },
    ];

    let marks = [
        MarkSpec {
            kind: MarkKind::Link,
            open: |_| "[".to_string(),
            close: close_link,
            html: None,
            rules: vec![InputRule::TypedPattern, InputRule::PastePattern],
        },
        MarkSpec {
            kind: MarkKind::Bold,
            open: |_| "**".to_string(),
            close: |_| "**".to_string(),
            html: Some(("<strong>", "</strong>")),
            rules: Vec::new(),
        },
        MarkSpec {
            kind: MarkKind::Italic,
            open: |_| "*".to_string(),
            close: |_| "*".to_string(),
            html: Some(("<em>", "</em>")),
            rules: Vec::new(),
        },
        MarkSpec {
            kind: MarkKind::Strike,
            open: |_| "~~".to_string(),
            close: |_| "~~".to_string(),
            html: Some(("<del>", "</del>")),
            rules: Vec::new(),
        },
        MarkSpec {
            kind: MarkKind::Underline,
            open: |_| "<u>".to_string(),
            close: |_| "</u>".to_string(),
            html: Some(("<u>", "</u>")),
            rules: Vec::new(),
        },
        // Code spans are emitted by the inline renderer itself.
        MarkSpec {
            kind: MarkKind::Code,
            open: |_| String::new(),
            close: |_| String::new(),
            html: None,
            rules: Vec::new(),
        },
    ];

    nodes
        .into_iter()
        .map(ExtensionDescriptor::Node)
        .chain(marks.into_iter().map(ExtensionDescriptor::Mark))
        .chain(std::iter::once(ExtensionDescriptor::Behavior(
            Behavior::TabIndentation {
                unit: DEFAULT_TAB_UNIT.to_string(),
            },
        )))
        .collect()
}

fn unexpected(expected: &'static str, token: &Token) -> DocError {
    DocError::UnexpectedTokenType {
        expected,
        found: token.kind.name().to_string(),
    }
}

fn parse_paragraph(ctx: &ParseContext<'_>, token: &Token) -> Result<Node, DocError> {
    match &token.kind {
        TokenKind::Paragraph => Ok(Node::paragraph(ctx.parse_inline(&token.inline)?)),
        TokenKind::Raw { text } if text.is_empty() || text.eq_ignore_ascii_case(EMPTY_PARAGRAPH) => {
            Ok(Node::paragraph(Vec::new()))
        }
        TokenKind::Raw { text } if is_break_tag(text) => Ok(Node::paragraph(vec![Node::hard_break()])),
        TokenKind::Raw { text } => Ok(Node::paragraph(vec![Node::text(text.as_str())])),
        _ => Err(unexpected("paragraph", token)),
    }
}

/// A paragraph holding only a hard break renders as a lone `<br>`, which
/// reads back as an HTML block.
fn is_break_tag(text: &str) -> bool {
    ["<br>", "<br/>", "<br />"]
        .iter()
        .any(|tag| text.eq_ignore_ascii_case(tag))
}

fn parse_heading(ctx: &ParseContext<'_>, token: &Token) -> Result<Node, DocError> {
    let TokenKind::Heading { level } = token.kind else {
        return Err(unexpected("heading", token));
    };
    Ok(Node::heading(
        level.clamp(1, MAX_HEADING_LEVEL),
        ctx.parse_inline(&token.inline)?,
    ))
}

fn parse_list(ctx: &ParseContext<'_>, token: &Token) -> Result<Node, DocError> {
    let TokenKind::List { start } = token.kind else {
        return Err(unexpected("list", token));
    };
    let items = ctx.parse_blocks(&token.children)?;
    Ok(match start {
        Some(start) => Node::ordered_list(start, items),
        None => Node::bullet_list(items),
    })
}

fn parse_list_item(ctx: &ParseContext<'_>, token: &Token) -> Result<Node, DocError> {
    if token.kind != TokenKind::Item {
        return Err(unexpected("list_item", token));
    }
    let mut children = ctx.parse_blocks(&token.children)?;
    if children.first().map(|child| child.kind) != Some(NodeKind::Paragraph) {
        children.insert(0, Node::paragraph(Vec::new()));
    }
    Ok(Node::list_item(children))
}

fn parse_blockquote(ctx: &ParseContext<'_>, token: &Token) -> Result<Node, DocError> {
    if token.kind != TokenKind::Blockquote {
        return Err(unexpected("blockquote", token));
    }
    let mut children = ctx.parse_blocks(&token.children)?;
    if children.is_empty() {
        children.push(Node::paragraph(Vec::new()));
    }
    Ok(Node::blockquote(children))
}

fn parse_code_block(_ctx: &ParseContext<'_>, token: &Token) -> Result<Node, DocError> {
    let TokenKind::CodeFence { info, text } = &token.kind else {
        return Err(unexpected("code", token));
    };
    let language = info.as_deref().unwrap_or(DEFAULT_CODE_LANGUAGE);
    Ok(Node::code_block(language, text))
}

fn parse_rule(_ctx: &ParseContext<'_>, token: &Token) -> Result<Node, DocError> {
    if token.kind != TokenKind::Rule {
        return Err(unexpected("hr", token));
    }
    Ok(Node::horizontal_rule())
}

/// Maps a table token to a table node. The token must be structurally a
/// table; anything else is rejected so callers can fall back to literal text.
fn parse_table(ctx: &ParseContext<'_>, token: &Token) -> Result<Node, DocError> {
    if !token.kind.is_table() {
        return Err(unexpected("table", token));
    }

    let mut rows = Vec::with_capacity(token.children.len());
    for part in &token.children {
        match part.kind {
            TokenKind::TableHead => {
                let cells: Vec<&Token> = head_cells(part).collect();
                if cells.iter().all(|cell| cell.inline.is_empty()) {
                    continue;
                }
                let cells = cells
                    .into_iter()
                    .map(|cell| parse_cell(ctx, cell, NodeKind::TableHeaderCell))
                    .collect::<Result<Vec<_>, _>>()?;
                rows.push(Node::table_row(cells));
            }
            TokenKind::TableRow => {
                let cells = part
                    .children
                    .iter()
                    .map(|cell| parse_cell(ctx, cell, NodeKind::TableCell))
                    .collect::<Result<Vec<_>, _>>()?;
                rows.push(Node::table_row(cells));
            }
            _ => return Err(unexpected("table_row", part)),
        }
    }
    Ok(Node::table(rows))
}

/// Header cells sit directly under the head, or under a row inside it.
fn head_cells(head: &Token) -> impl Iterator<Item = &Token> {
    head.children.iter().flat_map(|child| match child.kind {
        TokenKind::TableRow => child.children.iter().collect::<Vec<_>>(),
        _ => vec![child],
    })
}

fn parse_cell(ctx: &ParseContext<'_>, token: &Token, kind: NodeKind) -> Result<Node, DocError> {
    if token.kind != TokenKind::TableCell {
        return Err(unexpected("table_cell", token));
    }
    let children = match token.inline.as_slice() {
        [Inline::Html(html)] if html == EMPTY_CELL => Vec::new(),
        inline => ctx.parse_inline(inline)?,
    };
    let paragraph = Node::paragraph(children);
    Ok(match kind {
        NodeKind::TableHeaderCell => Node::table_header_cell(vec![paragraph]),
        _ => Node::table_cell(vec![paragraph]),
    })
}

/// A header row, when present, is the first row and is header throughout.
fn check_table(table: &Node) -> Result<(), String> {
    for (index, row) in table.children.iter().enumerate() {
        let headers = row
            .children
            .iter()
            .filter(|cell| cell.kind == NodeKind::TableHeaderCell)
            .count();
        if headers == 0 {
            continue;
        }
        if index > 0 {
            return Err(format!("header cells outside the first row (row {index})"));
        }
        if headers != row.children.len() {
            return Err("header row mixes header and body cells".to_string());
        }
    }
    Ok(())
}

fn render_document(ctx: &RenderContext<'_>, node: &Node) -> String {
    ctx.render_blocks(&node.children)
}

fn render_paragraph(ctx: &RenderContext<'_>, node: &Node) -> String {
    if node.children.is_empty() && !ctx.in_table {
        return EMPTY_PARAGRAPH.to_string();
    }
    ctx.render_inline(&node.children)
}

/// A bare marker already reads back as an item with an empty leading
/// paragraph, so that paragraph is only written when a paragraph follows.
fn render_list_item(ctx: &RenderContext<'_>, node: &Node) -> String {
    let blocks = match node.children.split_first() {
        Some((first, rest))
            if first.kind == NodeKind::Paragraph
                && first.children.is_empty()
                && rest.first().is_none_or(|next| next.kind != NodeKind::Paragraph) =>
        {
            rest
        }
        _ => node.children.as_slice(),
    };
    ctx.render_blocks(blocks)
}

fn render_heading(ctx: &RenderContext<'_>, node: &Node) -> String {
    let level = node.heading_level().unwrap_or(1).clamp(1, MAX_HEADING_LEVEL);
    let hashes = "#".repeat(usize::from(level));
    let text = ctx.render_inline_line(&node.children);
    if text.is_empty() {
        hashes
    } else {
        format!("{hashes} {text}")
    }
}

fn render_list(ctx: &RenderContext<'_>, node: &Node) -> String {
    let start = match node.attrs {
        crate::model::node::Attrs::OrderedList { start } => Some(start),
        _ => None,
    };
    let item_ctx = RenderContext::new(ctx.registry());

    node.children
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let marker = match start {
                Some(start) => {
                    let delimiter = if ctx.alternate { ')' } else { '.' };
                    format!("{}{delimiter}", start + index as u64)
                }
                None => (if ctx.alternate { "*" } else { "-" }).to_string(),
            };
            let body = item_ctx.render_block(item);
            indent_item(&marker, &body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Places `body` after `marker`, indenting continuation lines to the
/// content column.
fn indent_item(marker: &str, body: &str) -> String {
    if body.is_empty() {
        return marker.to_string();
    }
    let pad = " ".repeat(marker.len() + 1);
    let mut out = String::with_capacity(body.len() + marker.len() + 1);
    for (index, line) in body.split('\n').enumerate() {
        if index == 0 {
            out.push_str(marker);
            out.push(' ');
        } else {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&pad);
            }
        }
        out.push_str(line);
    }
    out
}

fn render_blockquote(ctx: &RenderContext<'_>, node: &Node) -> String {
    let inner = RenderContext::new(ctx.registry()).render_blocks(&node.children);
    inner
        .split('\n')
        .map(|line| {
            if line.is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_code_block(_ctx: &RenderContext<'_>, node: &Node) -> String {
    let code = node.text_content();
    let longest = code
        .split(|ch| ch != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    let info = match node.language() {
        DEFAULT_CODE_LANGUAGE => "",
        language => language,
    };
    if code.is_empty() {
        format!("{fence}{info}\n{fence}")
    } else {
        format!("{fence}{info}\n{code}\n{fence}")
    }
}

/// Header row, separator synthesized from the table width, body rows padded
/// to that width. Tables without rows render to nothing.
fn render_table(ctx: &RenderContext<'_>, node: &Node) -> String {
    let width = node
        .children
        .iter()
        .map(|row| row.children.len())
        .max()
        .unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let cell_ctx = ctx.in_table();
    let render_row = |row: &Node| {
        let mut cells: Vec<String> = row
            .children
            .iter()
            .map(|cell| cell_ctx.render_block(cell))
            .collect();
        cells.resize(width, String::new());
        cells
    };

    let has_header = node
        .children
        .first()
        .and_then(|row| row.children.first())
        .is_some_and(|cell| cell.kind == NodeKind::TableHeaderCell);
    let (header, body) = match node.children.split_first() {
        Some((first, rest)) if has_header => {
            let mut header = render_row(first);
            if header.iter().all(String::is_empty) {
                header[0] = EMPTY_CELL.to_string();
            }
            (header, rest)
        }
        _ => (vec![String::new(); width], node.children.as_slice()),
    };

    let mut lines = Vec::with_capacity(body.len() + 2);
    lines.push(pipe_row(&header));
    lines.push(pipe_row(&vec!["---".to_string(); width]));
    lines.extend(body.iter().map(|row| pipe_row(&render_row(row))));
    lines.join("\n")
}

fn pipe_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

fn render_table_row(ctx: &RenderContext<'_>, node: &Node) -> String {
    let cell_ctx = ctx.in_table();
    let cells: Vec<String> = node
        .children
        .iter()
        .map(|cell| cell_ctx.render_block(cell))
        .collect();
    if cells.is_empty() {
        String::new()
    } else {
        pipe_row(&cells)
    }
}

fn render_cell(ctx: &RenderContext<'_>, node: &Node) -> String {
    node.children
        .first()
        .map(|paragraph| ctx.in_table().render_inline(&paragraph.children))
        .unwrap_or_default()
}

fn close_link(mark: &Mark) -> String {
    let Mark::Link { href, title } = mark else {
        return String::new();
    };
    let destination = if href.is_empty()
        || href.contains(|ch: char| ch.is_whitespace() || matches!(ch, '(' | ')' | '<' | '>'))
    {
        format!("<{}>", href.replace('<', "%3C").replace('>', "%3E"))
    } else {
        href.clone()
    };
    match title {
        Some(title) => format!(
            "]({destination} \"{}\")",
            title.replace('\\', "\\\\").replace('"', "\\\"")
        ),
        None => format!("]({destination})"),
    }
}
