//! Plain-text fallback adapter. Lowest priority, accepts anything, and
//! emits the whole input as a single node — the chunker handles any
//! further splitting downstream.

use chrono::Utc;

use super::{Adapter, NodeStream, RawSource};
use crate::models::{ContentFormat, ContentNode, NodeContent, NodeMetadata};

pub const SOURCE_TYPE: &str = "plaintext";

pub struct PlainTextAdapter;

impl Adapter for PlainTextAdapter {
    fn name(&self) -> &str {
        "plaintext"
    }

    fn source_type(&self) -> &str {
        SOURCE_TYPE
    }

    fn detect(&self, _input: &RawSource) -> bool {
        true
    }

    fn parse<'a>(&'a self, input: &'a RawSource) -> NodeStream<'a> {
        let source_id = input
            .file_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "text".to_string());

        let mut metadata = NodeMetadata::new(Utc::now());
        metadata.title = input.file_name().map(|n| n.to_string());
        metadata.tags = vec!["text".to_string()];

        let node = ContentNode::assemble(
            SOURCE_TYPE,
            "plaintext",
            &source_id,
            0,
            NodeContent {
                text: input.text().into_owned(),
                format: ContentFormat::Plain,
            },
            metadata,
        );
        Box::new(std::iter::once(Ok(node)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_detects() {
        let adapter = PlainTextAdapter;
        assert!(adapter.detect(&RawSource::from_text("", None)));
        assert!(adapter.detect(&RawSource::new(vec![0xff, 0xfe], None)));
    }

    #[test]
    fn single_node_with_path_identity() {
        let adapter = PlainTextAdapter;
        let input = RawSource::from_text("some archived note", Some("notes/2022/april.txt"));
        let nodes: Vec<_> = adapter.parse(&input).filter_map(|r| r.ok()).collect();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].source.source_id, "april.txt");
        assert_eq!(nodes[0].uri, "source://plaintext/april.txt#0");
        assert_eq!(nodes[0].metadata.word_count, 3);
    }
}
