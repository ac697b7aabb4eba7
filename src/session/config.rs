use serde::{Deserialize, Serialize};
use std::fmt;

use crate::markdown::CodecConfig;
use crate::model::node::{Node, RawNode};
use crate::registry::indent::DEFAULT_TAB_UNIT;
use crate::sync::{LocalIdentity, SharedProvider, SharedReplica, ValidationLimits};

/// Editor-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    /// Undo entries kept per session.
    pub history_depth: usize,
    /// Inserted by tab inside code blocks.
    pub tab_indent: String,
    pub codec: CodecConfig,
    /// Incoming deltas above `max_payload_bytes` are dropped before they
    /// reach the replicated state.
    pub limits: ValidationLimits,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            history_depth: 100,
            tab_indent: DEFAULT_TAB_UNIT.to_string(),
            codec: CodecConfig::default(),
            limits: ValidationLimits::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitialContent {
    Markdown(String),
    Raw(RawNode),
    Tree(Node),
}

/// What the host hands to [`SessionManager::build`](super::SessionManager::build).
///
/// Collaboration needs both `replicated_doc` and `transport_provider`. The
/// replicated document stays owned by the host.
#[derive(Default)]
pub struct SessionConfig {
    pub replicated_doc: Option<SharedReplica>,
    pub transport_provider: Option<SharedProvider>,
    pub local_identity: Option<LocalIdentity>,
    pub initial_content: Option<InitialContent>,
    pub settings: EditorSettings,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("replicated_doc", &self.replicated_doc.is_some())
            .field("transport_provider", &self.transport_provider.is_some())
            .field("local_identity", &self.local_identity)
            .field("initial_content", &self.initial_content)
            .field("settings", &self.settings)
            .finish()
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replica(mut self, replica: SharedReplica) -> Self {
        self.replicated_doc = Some(replica);
        self
    }

    pub fn with_provider(mut self, provider: SharedProvider) -> Self {
        self.transport_provider = Some(provider);
        self
    }

    pub fn with_identity(mut self, identity: LocalIdentity) -> Self {
        self.local_identity = Some(identity);
        self
    }

    pub fn with_markdown(mut self, markdown: impl Into<String>) -> Self {
        self.initial_content = Some(InitialContent::Markdown(markdown.into()));
        self
    }

    pub fn with_raw(mut self, raw: RawNode) -> Self {
        self.initial_content = Some(InitialContent::Raw(raw));
        self
    }

    pub fn with_tree(mut self, root: Node) -> Self {
        self.initial_content = Some(InitialContent::Tree(root));
        self
    }

    pub fn with_settings(mut self, settings: EditorSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_fill_missing_fields() {
        let settings: EditorSettings = serde_json::from_str(r#"{"tab_indent": "\t"}"#).unwrap();
        assert_eq!(settings.tab_indent, "\t");
        assert_eq!(settings.codec, CodecConfig::default());

        let settings: EditorSettings = serde_json::from_str(r#"{"history_depth": 5}"#).unwrap();
        assert_eq!(settings.history_depth, 5);
        assert_eq!(settings.tab_indent, "  ");
    }

    #[test]
    fn test_debug_hides_handles() {
        let config = SessionConfig::new().with_markdown("# hi");
        let shown = format!("{config:?}");
        assert!(shown.contains("replicated_doc: false"));
    }
}
