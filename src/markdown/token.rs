//! Tokenizer: turns markdown text into a stream of block tokens.
//!
//! pulldown-cmark produces a nested start/end event stream; this module folds
//! it into [`Token`]s the way a lexer hands blocks to a parser. Constructs the
//! block vocabulary has no descriptor for (HTML blocks, images, footnotes) are
//! kept as raw source text so nothing the user wrote is dropped.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};
use std::ops::Range;

use super::CodecConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    #[error("input of {actual} bytes exceeds limit of {limit}")]
    InputTooLarge { limit: usize, actual: usize },
    #[error("nesting deeper than {limit} levels")]
    NestingTooDeep { limit: usize },
    #[error("unbalanced event stream")]
    Unbalanced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Paragraph,
    Heading { level: u8 },
    Blockquote,
    CodeFence { info: Option<String>, text: String },
    List { start: Option<u64> },
    Item,
    Table { columns: usize },
    TableHead,
    TableRow,
    TableCell,
    Rule,
    Raw { text: String },
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Heading { .. } => "heading",
            Self::Blockquote => "blockquote",
            Self::CodeFence { .. } => "code",
            Self::List { .. } => "list",
            Self::Item => "list_item",
            Self::Table { .. } => "table",
            Self::TableHead => "table_head",
            Self::TableRow => "table_row",
            Self::TableCell => "table_cell",
            Self::Rule => "hr",
            Self::Raw { .. } => "raw",
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Self::Table { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineTag {
    Emphasis,
    Strong,
    Strikethrough,
    Link { href: String, title: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Code(String),
    SoftBreak,
    HardBreak,
    Html(String),
    Raw(String),
    Span { tag: InlineTag, children: Vec<Inline> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub children: Vec<Token>,
    pub inline: Vec<Inline>,
    pub span: Range<usize>,
}

impl Token {
    /// Whether this token or any nested one is a table.
    pub fn contains_table(&self) -> bool {
        self.kind.is_table() || self.children.iter().any(Token::contains_table)
    }
}

enum FrameKind {
    Block(TokenKind),
    Inline(InlineTag),
    Opaque { raw: String, block: bool, depth: usize },
}

struct Frame {
    kind: FrameKind,
    children: Vec<Token>,
    inline: Vec<Inline>,
    text: String,
    span: Range<usize>,
}

impl Frame {
    fn new(kind: FrameKind, span: Range<usize>) -> Self {
        Self {
            kind,
            children: Vec::new(),
            inline: Vec::new(),
            text: String::new(),
            span,
        }
    }

    fn collects_text(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::Block(TokenKind::CodeFence { .. } | TokenKind::Raw { .. })
        )
    }

    /// Tight list items carry inline content without a paragraph wrapper.
    fn flush_loose_inline(&mut self) {
        if matches!(self.kind, FrameKind::Block(TokenKind::Item)) && !self.inline.is_empty() {
            let inline = std::mem::take(&mut self.inline);
            self.children.push(Token {
                kind: TokenKind::Paragraph,
                children: Vec::new(),
                inline,
                span: self.span.clone(),
            });
        }
    }
}

fn options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH
}

pub fn tokenize(text: &str, config: &CodecConfig) -> Result<Vec<Token>, TokenizeError> {
    if text.len() > config.max_input_bytes {
        return Err(TokenizeError::InputTooLarge {
            limit: config.max_input_bytes,
            actual: text.len(),
        });
    }

    let mut tokens = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    for (event, range) in Parser::new_ext(text, options()).into_offset_iter() {
        if let Some(Frame {
            kind: FrameKind::Opaque { depth, .. },
            ..
        }) = stack.last_mut()
        {
            match event {
                Event::Start(_) => {
                    *depth += 1;
                    continue;
                }
                Event::End(_) if *depth > 0 => {
                    *depth -= 1;
                    continue;
                }
                Event::End(_) => {}
                _ => continue,
            }
        }

        match event {
            Event::Start(tag) => {
                if stack.len() >= config.max_depth {
                    return Err(TokenizeError::NestingTooDeep {
                        limit: config.max_depth,
                    });
                }
                if let Some(parent) = stack.last_mut()
                    && is_block_tag(&tag)
                {
                    parent.flush_loose_inline();
                }
                let raw = text.get(range.clone()).unwrap_or_default();
                stack.push(Frame::new(frame_kind(tag, raw), range));
            }
            Event::End(_) => {
                let mut frame = stack.pop().ok_or(TokenizeError::Unbalanced)?;
                frame.flush_loose_inline();
                finish_frame(frame, &mut stack, &mut tokens)?;
            }
            Event::Text(content) => match stack.last_mut() {
                Some(frame) if frame.collects_text() => frame.text.push_str(&content),
                Some(frame) => frame.inline.push(Inline::Text(content.into_string())),
                None => return Err(TokenizeError::Unbalanced),
            },
            Event::Html(content) => match stack.last_mut() {
                Some(frame) if frame.collects_text() => frame.text.push_str(&content),
                Some(frame) => frame.inline.push(Inline::Html(content.into_string())),
                None => return Err(TokenizeError::Unbalanced),
            },
            Event::Code(content) => push_inline(&mut stack, Inline::Code(content.into_string()))?,
            Event::InlineHtml(content) => {
                push_inline(&mut stack, Inline::Html(content.into_string()))?
            }
            Event::SoftBreak => push_inline(&mut stack, Inline::SoftBreak)?,
            Event::HardBreak => push_inline(&mut stack, Inline::HardBreak)?,
            Event::Rule => {
                let token = Token {
                    kind: TokenKind::Rule,
                    children: Vec::new(),
                    inline: Vec::new(),
                    span: range,
                };
                push_block(&mut stack, &mut tokens, token);
            }
            _ => {
                let raw = text.get(range).unwrap_or_default().to_string();
                push_inline(&mut stack, Inline::Raw(raw))?;
            }
        }
    }

    if stack.is_empty() {
        Ok(tokens)
    } else {
        Err(TokenizeError::Unbalanced)
    }
}

fn is_block_tag(tag: &Tag<'_>) -> bool {
    !matches!(
        tag,
        Tag::Emphasis
            | Tag::Strong
            | Tag::Strikethrough
            | Tag::Link { .. }
            | Tag::Image { .. }
    )
}

fn frame_kind(tag: Tag<'_>, raw: &str) -> FrameKind {
    let block = is_block_tag(&tag);
    match tag {
        Tag::Paragraph => FrameKind::Block(TokenKind::Paragraph),
        Tag::Heading { level, .. } => FrameKind::Block(TokenKind::Heading { level: level as u8 }),
        Tag::BlockQuote(_) => FrameKind::Block(TokenKind::Blockquote),
        Tag::CodeBlock(kind) => {
            let info = match kind {
                CodeBlockKind::Fenced(info) => info
                    .split_whitespace()
                    .next()
                    .map(str::to_string),
                CodeBlockKind::Indented => None,
            };
            FrameKind::Block(TokenKind::CodeFence {
                info,
                text: String::new(),
            })
        }
        Tag::List(start) => FrameKind::Block(TokenKind::List { start }),
        Tag::Item => FrameKind::Block(TokenKind::Item),
        Tag::Table(alignments) => FrameKind::Block(TokenKind::Table {
            columns: alignments.len(),
        }),
        Tag::TableHead => FrameKind::Block(TokenKind::TableHead),
        Tag::TableRow => FrameKind::Block(TokenKind::TableRow),
        Tag::TableCell => FrameKind::Block(TokenKind::TableCell),
        Tag::HtmlBlock => FrameKind::Block(TokenKind::Raw {
            text: String::new(),
        }),
        Tag::Emphasis => FrameKind::Inline(InlineTag::Emphasis),
        Tag::Strong => FrameKind::Inline(InlineTag::Strong),
        Tag::Strikethrough => FrameKind::Inline(InlineTag::Strikethrough),
        Tag::Link {
            dest_url, title, ..
        } => FrameKind::Inline(InlineTag::Link {
            href: dest_url.into_string(),
            title: (!title.is_empty()).then(|| title.into_string()),
        }),
        _ => FrameKind::Opaque {
            raw: raw.trim_end().to_string(),
            block,
            depth: 0,
        },
    }
}

fn push_inline(stack: &mut [Frame], inline: Inline) -> Result<(), TokenizeError> {
    let frame = stack.last_mut().ok_or(TokenizeError::Unbalanced)?;
    frame.inline.push(inline);
    Ok(())
}

fn push_block(stack: &mut [Frame], tokens: &mut Vec<Token>, token: Token) {
    match stack.last_mut() {
        Some(parent) => {
            parent.flush_loose_inline();
            parent.children.push(token);
        }
        None => tokens.push(token),
    }
}

fn finish_frame(
    frame: Frame,
    stack: &mut [Frame],
    tokens: &mut Vec<Token>,
) -> Result<(), TokenizeError> {
    match frame.kind {
        FrameKind::Block(kind) => {
            let kind = match kind {
                TokenKind::CodeFence { info, .. } => {
                    let mut text = frame.text;
                    if text.ends_with('\n') {
                        text.pop();
                    }
                    TokenKind::CodeFence { info, text }
                }
                TokenKind::Raw { .. } => TokenKind::Raw {
                    text: frame.text.trim_end().to_string(),
                },
                other => other,
            };
            let token = Token {
                kind,
                children: frame.children,
                inline: frame.inline,
                span: frame.span,
            };
            push_block(stack, tokens, token);
            Ok(())
        }
        FrameKind::Inline(tag) => push_inline(
            stack,
            Inline::Span {
                tag,
                children: frame.inline,
            },
        ),
        FrameKind::Opaque { raw, block, .. } => {
            if block {
                let token = Token {
                    kind: TokenKind::Raw { text: raw },
                    children: Vec::new(),
                    inline: Vec::new(),
                    span: frame.span,
                };
                push_block(stack, tokens, token);
                Ok(())
            } else {
                push_inline(stack, Inline::Raw(raw))
            }
        }
    }
}
