//! Markdown codec: tokenizer, registry-driven block walk, inline marks.
//!
//! Parsing tokenizes the input once and hands every block token to the
//! descriptor registered for its kind. Rendering walks the tree and lets each
//! descriptor render its node; separators between blocks and table separator
//! rows are synthesized by the walk, never stored in the tree.
//!
//! The codec guarantees `parse(render(node))` is structurally equal to `node`
//! for every tree the registry accepts. The other direction normalizes.

mod blocks;
mod inline;
mod token;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::DocError;
use crate::model::node::Node;
use crate::registry::Registry;

pub use blocks::{ParseContext, RenderContext};
pub use token::{Inline, InlineTag, Token, TokenKind, TokenizeError, tokenize};

/// Tokenizer limits. Input beyond them is a tokenizer failure, never a panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub max_input_bytes: usize,
    pub max_depth: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: 8 * 1024 * 1024, // 8 MB
            max_depth: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkdownCodec {
    registry: Arc<Registry>,
    config: CodecConfig,
}

impl MarkdownCodec {
    pub fn new(registry: Arc<Registry>, config: CodecConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn tokenize(&self, text: &str) -> Result<Vec<Token>, TokenizeError> {
        tokenize(text, &self.config)
    }

    /// Parses markdown into a validated document tree.
    pub fn parse(&self, text: &str) -> Result<Node, DocError> {
        let tokens = self.tokenize(text)?;
        let blocks = self.parse_tokens(&tokens)?;
        let doc = Node::doc(blocks);
        self.registry.validate(&doc)?;
        Ok(doc)
    }

    /// Maps already tokenized blocks to nodes without wrapping them in a
    /// document. Used by paste, which inserts the blocks into an existing tree.
    pub fn parse_tokens(&self, tokens: &[Token]) -> Result<Vec<Node>, DocError> {
        ParseContext::new(&self.registry).parse_blocks(tokens)
    }

    /// Renders any node: a document renders its blocks, a block renders
    /// itself, inline content renders as a paragraph would.
    pub fn render(&self, node: &Node) -> String {
        let ctx = RenderContext::new(&self.registry);
        match node.kind {
            crate::model::node::NodeKind::Document => ctx.render_blocks(&node.children),
            kind if kind.is_inline() => ctx.render_inline(std::slice::from_ref(node)),
            _ => ctx.render_block(node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::Mark;

    fn codec() -> MarkdownCodec {
        MarkdownCodec::new(Arc::new(Registry::foundation()), CodecConfig::default())
    }

    #[test]
    fn test_parse_mixed_document() {
        let doc = codec()
            .parse("# Title\n\nSome **bold** text\n\n- a\n- b\n\n```rust\nfn x() {}\n```")
            .unwrap();
        assert_eq!(
            doc,
            Node::doc(vec![
                Node::heading(1, vec![Node::text("Title")]),
                Node::paragraph(vec![
                    Node::text("Some "),
                    Node::text_with_marks("bold", vec![Mark::Bold]),
                    Node::text(" text"),
                ]),
                Node::bullet_list(vec![
                    Node::list_item(vec![Node::paragraph(vec![Node::text("a")])]),
                    Node::list_item(vec![Node::paragraph(vec![Node::text("b")])]),
                ]),
                Node::code_block("rust", "fn x() {}"),
            ])
        );
    }

    #[test]
    fn test_render_document() {
        let doc = Node::doc(vec![
            Node::heading(2, vec![Node::text("Notes")]),
            Node::ordered_list(
                3,
                vec![Node::list_item(vec![Node::paragraph(vec![Node::text(
                    "third",
                )])])],
            ),
            Node::horizontal_rule(),
        ]);
        assert_eq!(codec().render(&doc), "## Notes\n\n3. third\n\n---");
    }

    #[test]
    fn test_heading_levels_clamp() {
        let doc = codec().parse("##### deep").unwrap();
        assert_eq!(doc.children[0].heading_level(), Some(3));
    }

    #[test]
    fn test_html_block_kept_as_text() {
        let doc = codec().parse("<div>hi</div>").unwrap();
        assert_eq!(doc.children[0].kind, crate::model::node::NodeKind::Paragraph);
        assert_eq!(doc.children[0].text_content(), "<div>hi</div>");
    }

    #[test]
    fn test_bang_before_link_is_escaped() {
        let doc = Node::doc(vec![Node::paragraph(vec![
            Node::text("see!"),
            Node::text_with_marks("a", vec![Mark::link("https://example.com")]),
        ])]);
        let rendered = codec().render(&doc);
        assert_eq!(rendered, "see\\![a](https://example.com)");
        assert_eq!(codec().parse(&rendered).unwrap(), doc);
    }

    #[test]
    fn test_emphasis_inside_words_keeps_delimiters() {
        let doc = Node::doc(vec![Node::paragraph(vec![
            Node::text("a"),
            Node::text_with_marks("b", vec![Mark::Bold]),
            Node::text("c"),
        ])]);
        let rendered = codec().render(&doc);
        assert_eq!(rendered, "a**b**c");
        assert_eq!(codec().parse(&rendered).unwrap(), doc);
    }

    #[test]
    fn test_punctuation_edges_fall_back_to_html() {
        let doc = Node::doc(vec![Node::paragraph(vec![
            Node::text("a"),
            Node::text_with_marks("(b)", vec![Mark::Bold]),
            Node::text("c "),
            Node::text_with_marks("x.", vec![Mark::Italic]),
            Node::text(" "),
            Node::text_with_marks("\"y\"", vec![Mark::Strike]),
            Node::text(" "),
            Node::text_with_marks("(z)", vec![Mark::Underline]),
        ])]);
        let rendered = codec().render(&doc);
        assert_eq!(
            rendered,
            "a<strong>(b)</strong>c <em>x.</em> <del>\"y\"</del> <u>(z)</u>"
        );
        assert_eq!(codec().parse(&rendered).unwrap(), doc);
    }

    #[test]
    fn test_nested_html_forms_restore_all_marks() {
        let doc = Node::doc(vec![Node::paragraph(vec![
            Node::text("x "),
            Node::text_with_marks("(y)", vec![Mark::Bold, Mark::Italic]),
        ])]);
        let rendered = codec().render(&doc);
        assert_eq!(rendered, "x <strong><em>(y)</em></strong>");
        assert_eq!(codec().parse(&rendered).unwrap(), doc);
    }

    #[test]
    fn test_heading_break_renders_as_tag() {
        let doc = Node::doc(vec![Node::heading(
            1,
            vec![Node::text("a"), Node::hard_break(), Node::text("b")],
        )]);
        let rendered = codec().render(&doc);
        assert_eq!(rendered, "# a<br>b");
        assert_eq!(codec().parse(&rendered).unwrap(), doc);
    }

    #[test]
    fn test_empty_paragraphs_survive() {
        let doc = Node::doc(vec![
            Node::paragraph(Vec::new()),
            Node::paragraph(vec![Node::text("a")]),
            Node::paragraph(vec![Node::hard_break()]),
        ]);
        let rendered = codec().render(&doc);
        assert_eq!(rendered, "<p></p>\n\na\n\n<br>");
        assert_eq!(codec().parse(&rendered).unwrap(), doc);
    }

    #[test]
    fn test_underline_html_toggles_mark() {
        let doc = codec().parse("a <u>b</u> c").unwrap();
        assert_eq!(
            doc.children[0].children[1],
            Node::text_with_marks("b", vec![Mark::Underline])
        );
    }
}
