//! Node tree vocabulary: block and inline kinds, marks, attributes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum NodeKind {
    Document,
    Paragraph,
    Heading,
    BulletList,
    OrderedList,
    ListItem,
    Blockquote,
    CodeBlock,
    Table,
    TableRow,
    TableCell,
    TableHeaderCell,
    HorizontalRule,
    HardBreak,
    Text,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Blocks whose children are inline content.
    pub fn is_textblock(self) -> bool {
        matches!(self, Self::Paragraph | Self::Heading | Self::CodeBlock)
    }

    pub fn is_inline(self) -> bool {
        matches!(self, Self::Text | Self::HardBreak)
    }

    pub fn is_cell(self) -> bool {
        matches!(self, Self::TableCell | Self::TableHeaderCell)
    }

    pub fn is_list(self) -> bool {
        matches!(self, Self::BulletList | Self::OrderedList)
    }
}

/// Mark kinds, declared in canonical nesting order: a link wraps bold,
/// bold wraps italic, and so on down to inline code.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MarkKind {
    Link,
    Bold,
    Italic,
    Strike,
    Underline,
    Code,
}

impl MarkKind {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Mark {
    Link {
        href: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Bold,
    Italic,
    Strike,
    Underline,
    Code,
}

impl Mark {
    pub fn kind(&self) -> MarkKind {
        match self {
            Self::Link { .. } => MarkKind::Link,
            Self::Bold => MarkKind::Bold,
            Self::Italic => MarkKind::Italic,
            Self::Strike => MarkKind::Strike,
            Self::Underline => MarkKind::Underline,
            Self::Code => MarkKind::Code,
        }
    }

    pub fn link(href: impl Into<String>) -> Self {
        Self::Link {
            href: href.into(),
            title: None,
        }
    }
}

/// Kind-specific attributes. Each kind accepts exactly one shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Attrs {
    #[default]
    None,
    Heading {
        level: u8,
    },
    CodeBlock {
        language: String,
    },
    OrderedList {
        start: u64,
    },
}

impl Attrs {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

pub const DEFAULT_CODE_LANGUAGE: &str = "plaintext";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Attrs::is_none")]
    pub attrs: Attrs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
}

impl Node {
    pub fn new(kind: NodeKind, attrs: Attrs, children: Vec<Node>) -> Self {
        Self {
            kind,
            attrs,
            children,
            text: None,
            marks: Vec::new(),
        }
    }

    pub fn doc(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Document, Attrs::None, children)
    }

    pub fn paragraph(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Paragraph, Attrs::None, children)
    }

    pub fn heading(level: u8, children: Vec<Node>) -> Self {
        Self::new(NodeKind::Heading, Attrs::Heading { level }, children)
    }

    pub fn code_block(language: impl Into<String>, text: &str) -> Self {
        let children = if text.is_empty() {
            Vec::new()
        } else {
            vec![Self::text(text)]
        };
        Self::new(
            NodeKind::CodeBlock,
            Attrs::CodeBlock {
                language: language.into(),
            },
            children,
        )
    }

    pub fn bullet_list(items: Vec<Node>) -> Self {
        Self::new(NodeKind::BulletList, Attrs::None, items)
    }

    pub fn ordered_list(start: u64, items: Vec<Node>) -> Self {
        Self::new(NodeKind::OrderedList, Attrs::OrderedList { start }, items)
    }

    pub fn list_item(children: Vec<Node>) -> Self {
        Self::new(NodeKind::ListItem, Attrs::None, children)
    }

    pub fn blockquote(children: Vec<Node>) -> Self {
        Self::new(NodeKind::Blockquote, Attrs::None, children)
    }

    pub fn table(rows: Vec<Node>) -> Self {
        Self::new(NodeKind::Table, Attrs::None, rows)
    }

    pub fn table_row(cells: Vec<Node>) -> Self {
        Self::new(NodeKind::TableRow, Attrs::None, cells)
    }

    pub fn table_cell(children: Vec<Node>) -> Self {
        Self::new(NodeKind::TableCell, Attrs::None, children)
    }

    pub fn table_header_cell(children: Vec<Node>) -> Self {
        Self::new(NodeKind::TableHeaderCell, Attrs::None, children)
    }

    pub fn horizontal_rule() -> Self {
        Self::new(NodeKind::HorizontalRule, Attrs::None, Vec::new())
    }

    pub fn hard_break() -> Self {
        Self::new(NodeKind::HardBreak, Attrs::None, Vec::new())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::text_with_marks(text, Vec::new())
    }

    pub fn text_with_marks(text: impl Into<String>, mut marks: Vec<Mark>) -> Self {
        marks.sort_by_key(Mark::kind);
        Self {
            kind: NodeKind::Text,
            attrs: Attrs::None,
            children: Vec::new(),
            text: Some(text.into()),
            marks,
        }
    }

    pub fn is_textblock(&self) -> bool {
        self.kind.is_textblock()
    }

    pub fn text_str(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Concatenated text of all descendants; hard breaks become newlines.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self.kind {
            NodeKind::Text => out.push_str(self.text_str()),
            NodeKind::HardBreak => out.push('\n'),
            _ => {
                for child in &self.children {
                    child.collect_text(out);
                }
            }
        }
    }

    pub fn heading_level(&self) -> Option<u8> {
        match self.attrs {
            Attrs::Heading { level } => Some(level),
            _ => None,
        }
    }

    pub fn language(&self) -> &str {
        match &self.attrs {
            Attrs::CodeBlock { language } => language,
            _ => DEFAULT_CODE_LANGUAGE,
        }
    }

    pub fn has_mark(&self, kind: MarkKind) -> bool {
        self.marks.iter().any(|mark| mark.kind() == kind)
    }

    pub fn descendant(&self, path: &[usize]) -> Option<&Node> {
        path.iter()
            .try_fold(self, |node, index| node.children.get(*index))
    }

    pub fn descendant_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let mut node = self;
        for index in path {
            node = node.children.get_mut(*index)?;
        }
        Some(node)
    }

    /// Total number of nodes in the subtree, including `self`.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Node::size).sum::<usize>()
    }
}

/// Host-facing node shape with string kinds and loosely typed attributes.
///
/// Turned into a typed [`Node`] by [`crate::registry::Registry::build`], which
/// rejects unregistered kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RawNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<RawMark>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMark {
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
}

impl RawNode {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_children(mut self, children: Vec<RawNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }
}

impl From<&Node> for RawNode {
    fn from(node: &Node) -> Self {
        let mut attrs = BTreeMap::new();
        match &node.attrs {
            Attrs::None => {}
            Attrs::Heading { level } => {
                attrs.insert("level".to_string(), Value::from(*level));
            }
            Attrs::CodeBlock { language } => {
                attrs.insert("language".to_string(), Value::from(language.as_str()));
            }
            Attrs::OrderedList { start } => {
                attrs.insert("start".to_string(), Value::from(*start));
            }
        }
        Self {
            kind: node.kind.name().to_string(),
            attrs,
            children: node.children.iter().map(RawNode::from).collect(),
            text: node.text.clone(),
            marks: node.marks.iter().map(RawMark::from).collect(),
        }
    }
}

impl From<&Mark> for RawMark {
    fn from(mark: &Mark) -> Self {
        let mut attrs = BTreeMap::new();
        if let Mark::Link { href, title } = mark {
            attrs.insert("href".to_string(), Value::from(href.as_str()));
            if let Some(title) = title {
                attrs.insert("title".to_string(), Value::from(title.as_str()));
            }
        }
        Self {
            kind: mark.kind().name().to_string(),
            attrs,
        }
    }
}
