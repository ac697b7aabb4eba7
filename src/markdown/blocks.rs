use crate::error::DocError;
use crate::model::node::{Node, NodeKind};
use crate::registry::Registry;

use super::inline::{InlineStyle, parse_inline, render_inline};
use super::token::{Inline, Token, TokenKind};

/// Handed to every descriptor's parse function so nested content goes back
/// through the same registry.
#[derive(Clone, Copy)]
pub struct ParseContext<'a> {
    registry: &'a Registry,
}

impl<'a> ParseContext<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn parse_blocks(&self, tokens: &[Token]) -> Result<Vec<Node>, DocError> {
        tokens.iter().map(|token| self.parse_block(token)).collect()
    }

    pub fn parse_block(&self, token: &Token) -> Result<Node, DocError> {
        let kind = node_kind_for(&token.kind).ok_or_else(|| DocError::UnexpectedTokenType {
            expected: "block",
            found: token.kind.name().to_string(),
        })?;
        let spec = self.registry.node_spec(kind)?;
        let parse = spec.parse.ok_or_else(|| DocError::UnexpectedTokenType {
            expected: kind.name(),
            found: token.kind.name().to_string(),
        })?;
        if matches!(token.kind, TokenKind::Raw { .. }) {
            tracing::debug!(span = ?token.span, "unsupported construct kept as text");
        }
        parse(self, token)
    }

    pub fn parse_inline(&self, items: &[Inline]) -> Result<Vec<Node>, DocError> {
        parse_inline(self.registry, items)
    }
}

/// Block kind a top-level or nested block token maps to. Table parts only
/// make sense inside a table and have no standalone kind.
fn node_kind_for(kind: &TokenKind) -> Option<NodeKind> {
    match kind {
        TokenKind::Paragraph | TokenKind::Raw { .. } => Some(NodeKind::Paragraph),
        TokenKind::Heading { .. } => Some(NodeKind::Heading),
        TokenKind::Blockquote => Some(NodeKind::Blockquote),
        TokenKind::CodeFence { .. } => Some(NodeKind::CodeBlock),
        TokenKind::List { start: None } => Some(NodeKind::BulletList),
        TokenKind::List { start: Some(_) } => Some(NodeKind::OrderedList),
        TokenKind::Item => Some(NodeKind::ListItem),
        TokenKind::Table { .. } => Some(NodeKind::Table),
        TokenKind::Rule => Some(NodeKind::HorizontalRule),
        TokenKind::TableHead | TokenKind::TableRow | TokenKind::TableCell => None,
    }
}

/// Handed to every descriptor's render function.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    registry: &'a Registry,
    /// Rendering inside a table cell: everything must stay on one line.
    pub in_table: bool,
    /// Use the alternate list marker so adjacent lists stay separate.
    pub alternate: bool,
}

impl<'a> RenderContext<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            in_table: false,
            alternate: false,
        }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn in_table(self) -> Self {
        Self {
            in_table: true,
            ..self
        }
    }

    /// Renders sibling blocks separated by blank lines. Empty renders are
    /// skipped so they never produce stray separators.
    pub fn render_blocks(&self, blocks: &[Node]) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(blocks.len());
        let mut previous: Option<(NodeKind, bool)> = None;

        for block in blocks {
            let alternate = match previous {
                Some((kind, alternate)) if kind == block.kind && kind.is_list() => !alternate,
                _ => false,
            };
            let ctx = Self {
                alternate,
                ..*self
            };
            let rendered = ctx.render_block(block);
            if rendered.is_empty() {
                continue;
            }
            previous = Some((block.kind, alternate));
            parts.push(rendered);
        }
        parts.join("\n\n")
    }

    pub fn render_block(&self, node: &Node) -> String {
        match self.registry.node_spec(node.kind) {
            Ok(spec) => (spec.render)(self, node),
            Err(err) => {
                tracing::warn!(kind = node.kind.name(), %err, "node kind not registered, skipped");
                String::new()
            }
        }
    }

    pub fn render_inline(&self, children: &[Node]) -> String {
        render_inline(
            self.registry,
            children,
            InlineStyle {
                single_line: self.in_table,
            },
        )
    }

    /// Inline content that must fit on one line regardless of context.
    pub fn render_inline_line(&self, children: &[Node]) -> String {
        render_inline(self.registry, children, InlineStyle { single_line: true })
    }
}
