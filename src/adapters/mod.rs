//! Pluggable source adapters and their registry.
//!
//! An [`Adapter`] recognizes one export format and turns its raw bytes
//! into a lazy stream of [`ContentNode`]s. Parse failures on individual
//! records do not abort the stream: the adapter yields a typed
//! [`ParseError`] for the bad record and continues, so one corrupt
//! message never loses the rest of an archive.
//!
//! The [`AdapterRegistry`] is an explicit value (no global state) that
//! evaluates detectors in descending priority order; the first adapter
//! that accepts the input wins. [`AdapterRegistry::with_builtins`]
//! pre-loads the four shipped adapters:
//!
//! | Adapter | Format | Priority |
//! |---------|--------|----------|
//! | `chatgpt` | ChatGPT `conversations.json` | 100 |
//! | `telegram` | Telegram Desktop `result.json` | 90 |
//! | `markdown` | Markdown documents | 50 |
//! | `plaintext` | Anything (fallback) | 0 |

pub mod chatgpt;
pub mod markdown;
pub mod plaintext;
pub mod telegram;

use std::borrow::Cow;

use crate::error::ParseError;
use crate::models::ContentNode;

/// Raw ingestion input: export bytes plus the originating file path, the
/// only hint an adapter may use besides the content itself.
#[derive(Debug, Clone)]
pub struct RawSource {
    pub bytes: Vec<u8>,
    pub path_hint: Option<String>,
}

impl RawSource {
    pub fn new(bytes: Vec<u8>, path_hint: Option<String>) -> Self {
        Self { bytes, path_hint }
    }

    pub fn from_text(text: &str, path_hint: Option<&str>) -> Self {
        Self {
            bytes: text.as_bytes().to_vec(),
            path_hint: path_hint.map(|s| s.to_string()),
        }
    }

    /// Lossy UTF-8 view of the input.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Final path segment of the hint, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.path_hint
            .as_deref()
            .and_then(|p| p.rsplit(['/', '\\']).next())
            .filter(|s| !s.is_empty())
    }

    /// Lowercased extension of the hint, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        let (_, ext) = name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}

/// Lazy, fallible record stream produced by [`Adapter::parse`].
pub type NodeStream<'a> = Box<dyn Iterator<Item = Result<ContentNode, ParseError>> + Send + 'a>;

/// One recognized export format.
pub trait Adapter: Send + Sync {
    /// Adapter name, recorded as provenance on every node it produces.
    fn name(&self) -> &str;

    /// Source type label (`chatgpt`, `telegram`, ...), the coarse grouping
    /// used by clustering and node queries.
    fn source_type(&self) -> &str;

    /// Whether this adapter recognizes the input.
    fn detect(&self, input: &RawSource) -> bool;

    /// Parse the input into a stream of nodes, yielding per-record errors
    /// inline rather than aborting.
    fn parse<'a>(&'a self, input: &'a RawSource) -> NodeStream<'a>;
}

struct Registered {
    priority: i32,
    adapter: Box<dyn Adapter>,
}

/// Priority-ordered adapter collection. Construct one per ingestion
/// context and pass it by reference; tests use custom sets.
pub struct AdapterRegistry {
    entries: Vec<Registered>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry pre-loaded with the built-in adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(chatgpt::ChatGptAdapter), 100);
        registry.register(Box::new(telegram::TelegramAdapter), 90);
        registry.register(Box::new(markdown::MarkdownAdapter), 50);
        registry.register(Box::new(plaintext::PlainTextAdapter), 0);
        registry
    }

    /// Register an adapter. Higher priority is consulted first; equal
    /// priorities keep registration order.
    pub fn register(&mut self, adapter: Box<dyn Adapter>, priority: i32) {
        self.entries.push(Registered { priority, adapter });
        self.entries.sort_by_key(|e| std::cmp::Reverse(e.priority));
    }

    /// Find the best-matching adapter for the input, if any.
    pub fn detect(&self, input: &RawSource) -> Option<&dyn Adapter> {
        self.entries
            .iter()
            .find(|e| e.adapter.detect(input))
            .map(|e| e.adapter.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentFormat, NodeContent, NodeMetadata};
    use chrono::Utc;

    struct FixedAdapter {
        name: &'static str,
        accepts: bool,
    }

    impl Adapter for FixedAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn source_type(&self) -> &str {
            self.name
        }

        fn detect(&self, _input: &RawSource) -> bool {
            self.accepts
        }

        fn parse<'a>(&'a self, _input: &'a RawSource) -> NodeStream<'a> {
            let node = ContentNode::assemble(
                self.name,
                self.name,
                "fixed",
                0,
                NodeContent {
                    text: "fixed".to_string(),
                    format: ContentFormat::Plain,
                },
                NodeMetadata::new(Utc::now()),
            );
            Box::new(std::iter::once(Ok(node)))
        }
    }

    #[test]
    fn highest_priority_match_wins() {
        let mut registry = AdapterRegistry::new();
        registry.register(
            Box::new(FixedAdapter {
                name: "low",
                accepts: true,
            }),
            1,
        );
        registry.register(
            Box::new(FixedAdapter {
                name: "high",
                accepts: true,
            }),
            10,
        );

        let input = RawSource::from_text("anything", None);
        assert_eq!(registry.detect(&input).unwrap().name(), "high");
    }

    #[test]
    fn non_matching_adapters_are_skipped() {
        let mut registry = AdapterRegistry::new();
        registry.register(
            Box::new(FixedAdapter {
                name: "picky",
                accepts: false,
            }),
            10,
        );
        registry.register(
            Box::new(FixedAdapter {
                name: "fallback",
                accepts: true,
            }),
            0,
        );

        let input = RawSource::from_text("anything", None);
        assert_eq!(registry.detect(&input).unwrap().name(), "fallback");
    }

    #[test]
    fn empty_registry_detects_nothing() {
        let registry = AdapterRegistry::new();
        assert!(registry.detect(&RawSource::from_text("x", None)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn builtins_fall_back_to_plaintext() {
        let registry = AdapterRegistry::with_builtins();
        assert_eq!(registry.len(), 4);
        let input = RawSource::from_text("just some prose, nothing structured", None);
        assert_eq!(registry.detect(&input).unwrap().name(), "plaintext");
    }

    #[test]
    fn raw_source_path_helpers() {
        let input = RawSource::from_text("", Some("exports/2024/conversations.json"));
        assert_eq!(input.file_name(), Some("conversations.json"));
        assert_eq!(input.extension().as_deref(), Some("json"));
        assert_eq!(RawSource::from_text("", None).file_name(), None);
    }
}
