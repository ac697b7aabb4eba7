//! Link input rules. The link descriptor carries an ordered rule list instead
//! of layered link variants: a typed-pattern rule for `[label](url)` typed
//! inline, and a paste-pattern rule for a pasted bare URL.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::model::position::grapheme_len;

static TYPED_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\[\]]+)\]\(([^()\s]+)\)$").expect("static link pattern")
});

const LINK_SCHEMES: &[&str] = &["http", "https", "mailto"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRule {
    TypedPattern,
    PastePattern,
}

/// A just-typed `[label](url)` at the end of the text before the caret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedLink {
    /// Grapheme offset where the pattern starts.
    pub from: usize,
    /// Grapheme offset where it ends (the caret).
    pub to: usize,
    pub label: String,
    pub href: String,
}

impl InputRule {
    pub fn typed(&self, before_caret: &str) -> Option<TypedLink> {
        if *self != Self::TypedPattern {
            return None;
        }
        let captures = TYPED_LINK.captures(before_caret)?;
        let whole = captures.get(0)?;
        let href = captures.get(2)?.as_str();
        if !is_link_target(href) {
            return None;
        }
        let from = grapheme_len(&before_caret[..whole.start()]);
        Some(TypedLink {
            from,
            to: from + grapheme_len(whole.as_str()),
            label: captures.get(1)?.as_str().to_string(),
            href: href.to_string(),
        })
    }

    /// The URL to link when the pasted text is a single bare URL.
    pub fn pasted(&self, text: &str) -> Option<String> {
        if *self != Self::PastePattern {
            return None;
        }
        let candidate = text.trim();
        if candidate.is_empty() || candidate.contains(char::is_whitespace) {
            return None;
        }
        is_link_target(candidate).then(|| candidate.to_string())
    }
}

fn is_link_target(candidate: &str) -> bool {
    Url::parse(candidate).is_ok_and(|url| LINK_SCHEMES.contains(&url.scheme()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_link_at_caret() {
        let typed = InputRule::TypedPattern
            .typed("see [docs](https://example.com)")
            .unwrap();
        assert_eq!(typed.from, 4);
        assert_eq!(typed.to, 31);
        assert_eq!(typed.label, "docs");
        assert_eq!(typed.href, "https://example.com");
    }

    #[test]
    fn test_typed_link_requires_url_and_end() {
        assert!(InputRule::TypedPattern.typed("[a](not a url)").is_none());
        assert!(InputRule::TypedPattern.typed("[a](relative)").is_none());
        assert!(
            InputRule::TypedPattern
                .typed("[a](https://x.io) more")
                .is_none()
        );
        assert!(InputRule::PastePattern.typed("[a](https://x.io)").is_none());
    }

    #[test]
    fn test_pasted_bare_url() {
        assert_eq!(
            InputRule::PastePattern.pasted("  https://example.com/a?b=1\n"),
            Some("https://example.com/a?b=1".to_string())
        );
        assert!(InputRule::PastePattern.pasted("see https://x.io").is_none());
        assert!(InputRule::PastePattern.pasted("ftp://x.io").is_none());
        assert!(InputRule::TypedPattern.pasted("https://x.io").is_none());
    }
}
