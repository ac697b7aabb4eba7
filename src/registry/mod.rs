//! Block extension registry.
//!
//! The registry owns a closed set of [`ExtensionDescriptor`]s, fixed at
//! construction. Node descriptors carry the structural rules the document
//! model validates against plus the markdown parse/render functions the codec
//! dispatches to; mark descriptors carry delimiters and input rules; behavior
//! descriptors switch on editor behaviors (tab indentation, replication,
//! presence).

mod foundation;
pub mod indent;
pub mod link;

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DocError;
use crate::markdown::{ParseContext, RenderContext, Token};
use crate::model::Origin;
use crate::model::node::{Attrs, Mark, MarkKind, Node, NodeKind, RawMark, RawNode};
use crate::sync::presence::{CaretDecoration, PresenceRecord, default_caret};

pub use foundation::compose_foundation;
pub use link::InputRule;

pub type ParseFn = fn(&ParseContext<'_>, &Token) -> Result<Node, DocError>;
pub type RenderFn = fn(&RenderContext<'_>, &Node) -> String;
pub type CheckFn = fn(&Node) -> Result<(), String>;
pub type DelimiterFn = fn(&Mark) -> String;
pub type CaretFn = fn(&PresenceRecord) -> CaretDecoration;

/// Which children a node accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRule {
    /// Block-level nodes, at least `min` of them.
    Blocks { min: usize },
    /// A paragraph followed by any block-level nodes.
    ParagraphFirst,
    /// Text and hard breaks.
    Inline,
    /// Unmarked text only.
    PlainText,
    /// Only the listed kinds, at least `min` children.
    Only {
        kinds: &'static [NodeKind],
        min: usize,
    },
    /// Exactly one paragraph.
    SingleParagraph,
    /// No children.
    Leaf,
}

/// Which attribute shape a node carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrRule {
    None,
    HeadingLevel { min: u8, max: u8 },
    Language,
    Start,
}

#[derive(Clone)]
pub struct NodeSpec {
    pub kind: NodeKind,
    /// May appear wherever block content is accepted.
    pub block: bool,
    pub content: ContentRule,
    pub attrs: AttrRule,
    pub parse: Option<ParseFn>,
    pub render: RenderFn,
    /// Kind-specific invariant beyond the content rule.
    pub check: Option<CheckFn>,
}

#[derive(Clone)]
pub struct MarkSpec {
    pub kind: MarkKind,
    pub open: DelimiterFn,
    pub close: DelimiterFn,
    /// Inline HTML tags written when the delimiters would not parse back.
    pub html: Option<(&'static str, &'static str)>,
    /// Applied in order; the first matching rule wins.
    pub rules: Vec<InputRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationSpec {
    /// Transaction origins the collaborative undo manager records.
    pub tracked_origins: Vec<Origin>,
}

impl Default for ReplicationSpec {
    fn default() -> Self {
        Self {
            tracked_origins: vec![Origin::Local],
        }
    }
}

#[derive(Clone)]
pub struct PresenceSpec {
    pub renderer: CaretFn,
}

impl Default for PresenceSpec {
    fn default() -> Self {
        Self {
            renderer: default_caret,
        }
    }
}

#[derive(Clone)]
pub enum Behavior {
    TabIndentation { unit: String },
    Replication(ReplicationSpec),
    Presence(PresenceSpec),
}

impl Behavior {
    fn name(&self) -> &'static str {
        match self {
            Self::TabIndentation { .. } => "tabIndentation",
            Self::Replication(_) => "replication",
            Self::Presence(_) => "presence",
        }
    }
}

#[derive(Clone)]
pub enum ExtensionDescriptor {
    Node(NodeSpec),
    Mark(MarkSpec),
    Behavior(Behavior),
}

impl ExtensionDescriptor {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Node(spec) => spec.kind.name(),
            Self::Mark(spec) => spec.kind.name(),
            Self::Behavior(behavior) => behavior.name(),
        }
    }
}

impl fmt::Debug for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            Self::Node(_) => "Node",
            Self::Mark(_) => "Mark",
            Self::Behavior(_) => "Behavior",
        };
        write!(f, "{variant}({})", self.name())
    }
}

/// The set of descriptors collaboration adds on top of the foundation set.
pub fn compose_collaboration() -> Vec<ExtensionDescriptor> {
    vec![
        ExtensionDescriptor::Behavior(Behavior::Replication(ReplicationSpec::default())),
        ExtensionDescriptor::Behavior(Behavior::Presence(PresenceSpec::default())),
    ]
}

#[derive(Debug, Clone)]
pub struct Registry {
    descriptors: Vec<ExtensionDescriptor>,
    nodes: BTreeMap<NodeKind, usize>,
    marks: BTreeMap<MarkKind, usize>,
}

/// Why a tree failed validation.
enum Fault {
    Unregistered(&'static str),
    Invalid(String),
}

impl Registry {
    /// Builds a registry, rejecting duplicate descriptors and content rules
    /// that name unregistered kinds.
    pub fn new(descriptors: Vec<ExtensionDescriptor>) -> Result<Self, DocError> {
        let mut seen = Vec::new();
        for descriptor in &descriptors {
            let name = descriptor.name();
            if seen.contains(&name) {
                return Err(DocError::violation(
                    "registry",
                    format!("duplicate descriptor `{name}`"),
                ));
            }
            seen.push(name);
        }

        let registry = Self::assemble(descriptors);
        if !registry.nodes.contains_key(&NodeKind::Document) {
            return Err(DocError::UnknownBlockKind(NodeKind::Document.name().into()));
        }
        for spec in registry.node_specs() {
            if let ContentRule::Only { kinds, .. } = spec.content {
                for kind in kinds {
                    registry.node_spec(*kind)?;
                }
            }
        }
        Ok(registry)
    }

    /// The foundation vocabulary. Always succeeds.
    pub fn foundation() -> Self {
        Self::assemble(compose_foundation())
    }

    /// Foundation vocabulary plus replication and presence behaviors.
    pub fn collaboration() -> Self {
        let mut descriptors = compose_foundation();
        descriptors.extend(compose_collaboration());
        Self::assemble(descriptors)
    }

    fn assemble(descriptors: Vec<ExtensionDescriptor>) -> Self {
        let mut nodes = BTreeMap::new();
        let mut marks = BTreeMap::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            match descriptor {
                ExtensionDescriptor::Node(spec) => {
                    nodes.insert(spec.kind, index);
                }
                ExtensionDescriptor::Mark(spec) => {
                    marks.insert(spec.kind, index);
                }
                ExtensionDescriptor::Behavior(_) => {}
            }
        }
        Self {
            descriptors,
            nodes,
            marks,
        }
    }

    pub fn descriptors(&self) -> &[ExtensionDescriptor] {
        &self.descriptors
    }

    /// Looks a descriptor up by its registered name.
    pub fn resolve(&self, kind: &str) -> Result<&ExtensionDescriptor, DocError> {
        let index = NodeKind::from_str(kind)
            .ok()
            .and_then(|kind| self.nodes.get(&kind))
            .or_else(|| {
                MarkKind::from_str(kind)
                    .ok()
                    .and_then(|kind| self.marks.get(&kind))
            })
            .ok_or_else(|| DocError::UnknownBlockKind(kind.to_string()))?;
        Ok(&self.descriptors[*index])
    }

    pub fn node_spec(&self, kind: NodeKind) -> Result<&NodeSpec, DocError> {
        match self.nodes.get(&kind).map(|index| &self.descriptors[*index]) {
            Some(ExtensionDescriptor::Node(spec)) => Ok(spec),
            _ => Err(DocError::UnknownBlockKind(kind.name().to_string())),
        }
    }

    pub fn mark_spec(&self, kind: MarkKind) -> Result<&MarkSpec, DocError> {
        match self.marks.get(&kind).map(|index| &self.descriptors[*index]) {
            Some(ExtensionDescriptor::Mark(spec)) => Ok(spec),
            _ => Err(DocError::UnknownBlockKind(kind.name().to_string())),
        }
    }

    /// The mark whose HTML form uses `tag`, and whether `tag` closes it.
    pub fn mark_for_tag(&self, tag: &str) -> Option<(MarkKind, bool)> {
        self.descriptors.iter().find_map(|descriptor| match descriptor {
            ExtensionDescriptor::Mark(MarkSpec {
                kind,
                html: Some((open, close)),
                ..
            }) => {
                if tag.eq_ignore_ascii_case(open) {
                    Some((*kind, false))
                } else if tag.eq_ignore_ascii_case(close) {
                    Some((*kind, true))
                } else {
                    None
                }
            }
            _ => None,
        })
    }

    pub fn node_specs(&self) -> impl Iterator<Item = &NodeSpec> {
        self.descriptors.iter().filter_map(|descriptor| match descriptor {
            ExtensionDescriptor::Node(spec) => Some(spec),
            _ => None,
        })
    }

    pub fn behaviors(&self) -> impl Iterator<Item = &Behavior> {
        self.descriptors.iter().filter_map(|descriptor| match descriptor {
            ExtensionDescriptor::Behavior(behavior) => Some(behavior),
            _ => None,
        })
    }

    pub fn tab_unit(&self) -> Option<&str> {
        self.behaviors().find_map(|behavior| match behavior {
            Behavior::TabIndentation { unit } => Some(unit.as_str()),
            _ => None,
        })
    }

    pub fn replication(&self) -> Option<&ReplicationSpec> {
        self.behaviors().find_map(|behavior| match behavior {
            Behavior::Replication(spec) => Some(spec),
            _ => None,
        })
    }

    pub fn presence(&self) -> Option<&PresenceSpec> {
        self.behaviors().find_map(|behavior| match behavior {
            Behavior::Presence(spec) => Some(spec),
            _ => None,
        })
    }

    /// Input rules of every registered mark, in registration order.
    pub fn input_rules(&self) -> impl Iterator<Item = &InputRule> {
        self.descriptors
            .iter()
            .filter_map(|descriptor| match descriptor {
                ExtensionDescriptor::Mark(spec) => Some(spec.rules.iter()),
                _ => None,
            })
            .flatten()
    }

    /// Checks a whole document against the registered structural rules.
    pub fn validate(&self, root: &Node) -> Result<(), DocError> {
        self.check_tree(root).map_err(|fault| match fault {
            Fault::Unregistered(kind) => DocError::UnknownBlockKind(kind.to_string()),
            Fault::Invalid(reason) => DocError::violation("validate", reason),
        })
    }

    /// Like [`Registry::validate`] but blames `op` for any problem.
    pub(crate) fn validate_for(&self, op: &str, root: &Node) -> Result<(), DocError> {
        self.check_tree(root).map_err(|fault| match fault {
            Fault::Unregistered(kind) => {
                DocError::violation(op, format!("kind `{kind}` is not registered"))
            }
            Fault::Invalid(reason) => DocError::violation(op, reason),
        })
    }

    fn check_tree(&self, root: &Node) -> Result<(), Fault> {
        if root.kind != NodeKind::Document {
            return Err(Fault::Invalid(format!(
                "root must be a document, found {}",
                root.kind
            )));
        }
        self.check_node(root)
    }

    fn check_node(&self, node: &Node) -> Result<(), Fault> {
        let spec = self
            .node_spec(node.kind)
            .map_err(|_| Fault::Unregistered(node.kind.name()))?;

        for mark in &node.marks {
            self.mark_spec(mark.kind())
                .map_err(|_| Fault::Unregistered(mark.kind().name()))?;
        }
        if node.kind == NodeKind::Text {
            if node.text_str().is_empty() {
                return Err(Fault::Invalid("empty text node".into()));
            }
        } else if node.text.is_some() || !node.marks.is_empty() {
            return Err(Fault::Invalid(format!("{} cannot carry text", node.kind)));
        }

        for child in &node.children {
            self.node_spec(child.kind)
                .map_err(|_| Fault::Unregistered(child.kind.name()))?;
        }
        check_attrs(spec.attrs, node)?;
        self.check_content(spec.content, node)?;
        if let Some(check) = spec.check {
            check(node).map_err(Fault::Invalid)?;
        }

        node.children
            .iter()
            .try_for_each(|child| self.check_node(child))
    }

    fn is_block(&self, kind: NodeKind) -> bool {
        self.node_spec(kind).is_ok_and(|spec| spec.block)
    }

    fn check_content(&self, rule: ContentRule, node: &Node) -> Result<(), Fault> {
        let children = &node.children;
        let misplaced = |child: &Node| {
            Fault::Invalid(format!("{} cannot contain {}", node.kind, child.kind))
        };
        let too_few = |min: usize| {
            Fault::Invalid(format!("{} needs at least {min} children", node.kind))
        };

        match rule {
            ContentRule::Blocks { min } => {
                if children.len() < min {
                    return Err(too_few(min));
                }
                if let Some(child) = children.iter().find(|child| !self.is_block(child.kind)) {
                    return Err(misplaced(child));
                }
            }
            ContentRule::ParagraphFirst => match children.split_first() {
                Some((first, _)) if first.kind != NodeKind::Paragraph => {
                    return Err(Fault::Invalid(format!(
                        "{} must start with a paragraph",
                        node.kind
                    )));
                }
                Some((_, rest)) => {
                    if let Some(child) = rest.iter().find(|child| !self.is_block(child.kind)) {
                        return Err(misplaced(child));
                    }
                }
                None => return Err(too_few(1)),
            },
            ContentRule::Inline => {
                if let Some(child) = children.iter().find(|child| !child.kind.is_inline()) {
                    return Err(misplaced(child));
                }
            }
            ContentRule::PlainText => {
                if let Some(child) = children
                    .iter()
                    .find(|child| child.kind != NodeKind::Text || !child.marks.is_empty())
                {
                    return Err(misplaced(child));
                }
            }
            ContentRule::Only { kinds, min } => {
                if children.len() < min {
                    return Err(too_few(min));
                }
                if let Some(child) = children.iter().find(|child| !kinds.contains(&child.kind)) {
                    return Err(misplaced(child));
                }
            }
            ContentRule::SingleParagraph => {
                if children.len() != 1 || children[0].kind != NodeKind::Paragraph {
                    return Err(Fault::Invalid(format!(
                        "{} must hold exactly one paragraph",
                        node.kind
                    )));
                }
            }
            ContentRule::Leaf => {
                if let Some(child) = children.first() {
                    return Err(misplaced(child));
                }
            }
        }
        Ok(())
    }

    /// Turns a host-supplied raw tree into typed nodes. Any kind without a
    /// node descriptor fails with [`DocError::UnknownBlockKind`]; nothing is
    /// returned for a tree that fails anywhere.
    pub fn build(&self, raw: &RawNode) -> Result<Node, DocError> {
        let kind = match self.resolve(&raw.kind)? {
            ExtensionDescriptor::Node(spec) => spec.kind,
            _ => return Err(DocError::UnknownBlockKind(raw.kind.clone())),
        };
        let spec = self.node_spec(kind)?;
        let attrs = build_attrs(spec.attrs, raw)?;
        let marks = raw
            .marks
            .iter()
            .map(|mark| self.build_mark(mark))
            .collect::<Result<Vec<_>, _>>()?;
        let children = raw
            .children
            .iter()
            .map(|child| self.build(child))
            .collect::<Result<Vec<_>, _>>()?;

        if kind == NodeKind::Text {
            let mut node = Node::text_with_marks(raw.text.clone().unwrap_or_default(), marks);
            node.children = children;
            return Ok(node);
        }
        if !marks.is_empty() || raw.text.is_some() {
            return Err(DocError::violation(
                "build",
                format!("{kind} cannot carry text or marks"),
            ));
        }
        Ok(Node::new(kind, attrs, children))
    }

    fn build_mark(&self, raw: &RawMark) -> Result<Mark, DocError> {
        let kind = match self.resolve(&raw.kind)? {
            ExtensionDescriptor::Mark(spec) => spec.kind,
            _ => return Err(DocError::UnknownBlockKind(raw.kind.clone())),
        };
        Ok(match kind {
            MarkKind::Link => Mark::Link {
                href: string_attr(&raw.attrs, "href").ok_or_else(|| {
                    DocError::violation("build", "link mark needs an href")
                })?,
                title: string_attr(&raw.attrs, "title"),
            },
            MarkKind::Bold => Mark::Bold,
            MarkKind::Italic => Mark::Italic,
            MarkKind::Strike => Mark::Strike,
            MarkKind::Underline => Mark::Underline,
            MarkKind::Code => Mark::Code,
        })
    }
}

fn string_attr(attrs: &BTreeMap<String, Value>, key: &str) -> Option<String> {
    attrs.get(key).and_then(Value::as_str).map(str::to_string)
}

fn build_attrs(rule: AttrRule, raw: &RawNode) -> Result<Attrs, DocError> {
    let number = |key: &str| raw.attrs.get(key).and_then(Value::as_u64);
    Ok(match rule {
        AttrRule::None => Attrs::None,
        AttrRule::HeadingLevel { min, max } => {
            let level = number("level")
                .and_then(|level| u8::try_from(level).ok())
                .filter(|level| (min..=max).contains(level))
                .ok_or_else(|| {
                    DocError::violation("build", format!("heading level must be {min}..={max}"))
                })?;
            Attrs::Heading { level }
        }
        AttrRule::Language => Attrs::CodeBlock {
            language: string_attr(&raw.attrs, "language")
                .filter(|language| !language.is_empty())
                .unwrap_or_else(|| crate::model::node::DEFAULT_CODE_LANGUAGE.to_string()),
        },
        AttrRule::Start => Attrs::OrderedList {
            start: number("start").unwrap_or(1),
        },
    })
}

fn check_attrs(rule: AttrRule, node: &Node) -> Result<(), Fault> {
    let ok = match (rule, &node.attrs) {
        (AttrRule::None, Attrs::None) => true,
        (AttrRule::HeadingLevel { min, max }, Attrs::Heading { level }) => {
            (min..=max).contains(level)
        }
        (AttrRule::Language, Attrs::CodeBlock { language }) => {
            !language.is_empty() && !language.contains(char::is_whitespace)
        }
        (AttrRule::Start, Attrs::OrderedList { .. }) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Fault::Invalid(format!(
            "invalid attributes for {}: {:?}",
            node.kind, node.attrs
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_and_unknown() {
        let registry = Registry::foundation();
        assert_eq!(registry.resolve("table").unwrap().name(), "table");
        assert_eq!(registry.resolve("link").unwrap().name(), "link");
        assert_eq!(
            registry.resolve("unsupported-widget").unwrap_err(),
            DocError::UnknownBlockKind("unsupported-widget".into())
        );
    }

    #[test]
    fn test_duplicate_descriptor_rejected() {
        let mut descriptors = compose_foundation();
        let duplicate = descriptors[1].clone();
        descriptors.push(duplicate);
        assert!(matches!(
            Registry::new(descriptors),
            Err(DocError::StructuralViolation { .. })
        ));
    }

    #[test]
    fn test_content_rule_referencing_missing_kind() {
        let descriptors: Vec<_> = compose_foundation()
            .into_iter()
            .filter(|descriptor| descriptor.name() != "listItem")
            .collect();
        assert_eq!(
            Registry::new(descriptors).unwrap_err(),
            DocError::UnknownBlockKind("listItem".into())
        );
    }

    #[test]
    fn test_validate_rejects_misplaced_children() {
        let registry = Registry::foundation();
        let doc = Node::doc(vec![Node::text("loose")]);
        assert!(matches!(
            registry.validate(&doc),
            Err(DocError::StructuralViolation { .. })
        ));

        let row = Node::table_row(vec![Node::paragraph(vec![])]);
        let doc = Node::doc(vec![Node::table(vec![row])]);
        assert!(registry.validate(&doc).is_err());
    }

    #[test]
    fn test_validate_heading_level_range() {
        let registry = Registry::foundation();
        let doc = Node::doc(vec![Node::heading(4, vec![])]);
        assert!(registry.validate(&doc).is_err());
        let doc = Node::doc(vec![Node::heading(3, vec![])]);
        assert!(registry.validate(&doc).is_ok());
    }

    #[test]
    fn test_unregistered_kind_in_restricted_registry() {
        let descriptors: Vec<_> = compose_foundation()
            .into_iter()
            .filter(|descriptor| {
                !matches!(
                    descriptor.name(),
                    "table" | "tableRow" | "tableCell" | "tableHeaderCell"
                )
            })
            .collect();
        let registry = Registry::new(descriptors).unwrap();
        let doc = Node::doc(vec![Node::table(vec![])]);
        assert_eq!(
            registry.validate(&doc),
            Err(DocError::UnknownBlockKind("table".into()))
        );
    }

    #[test]
    fn test_build_from_raw() {
        let registry = Registry::foundation();
        let raw = RawNode::new("doc").with_children(vec![]);
        assert_eq!(
            registry.build(&raw).unwrap_err(),
            DocError::UnknownBlockKind("doc".into())
        );

        let raw = RawNode::new("document").with_children(vec![
            RawNode::new("heading")
                .with_attr("level", Value::from(2))
                .with_children(vec![RawNode::new("text").with_text("Hi")]),
        ]);
        let node = registry.build(&raw).unwrap();
        assert_eq!(node, Node::doc(vec![Node::heading(2, vec![Node::text("Hi")])]));
    }

    #[test]
    fn test_collaboration_behaviors() {
        let registry = Registry::collaboration();
        assert_eq!(
            registry.replication().map(|spec| spec.tracked_origins.clone()),
            Some(vec![Origin::Local])
        );
        assert!(registry.presence().is_some());
        assert!(Registry::foundation().replication().is_none());
        assert_eq!(Registry::foundation().tab_unit(), Some("  "));
    }
}
