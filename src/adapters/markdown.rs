//! Markdown document adapter.
//!
//! Splits a document into one node per top-level (`# `) section; the
//! section heading becomes the node title. Documents without top-level
//! headings become a single node. Sub-headings stay inside their section
//! so the chunker, not the adapter, decides any further splitting.

use chrono::Utc;

use super::{Adapter, NodeStream, RawSource};
use crate::models::{ContentFormat, ContentNode, NodeContent, NodeMetadata};

pub const SOURCE_TYPE: &str = "markdown";

pub struct MarkdownAdapter;

impl Adapter for MarkdownAdapter {
    fn name(&self) -> &str {
        "markdown"
    }

    fn source_type(&self) -> &str {
        SOURCE_TYPE
    }

    fn detect(&self, input: &RawSource) -> bool {
        if matches!(input.extension().as_deref(), Some("md") | Some("markdown")) {
            return true;
        }
        input.text().trim_start().starts_with("# ")
    }

    fn parse<'a>(&'a self, input: &'a RawSource) -> NodeStream<'a> {
        let text = input.text().into_owned();
        let source_id = input
            .file_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "document.md".to_string());

        let sections = split_sections(&text);
        let fallback_title = source_id.clone();

        Box::new(sections.into_iter().enumerate().map(move |(offset, section)| {
            let title = section
                .lines()
                .find(|l| l.starts_with("# "))
                .map(|l| l.trim_start_matches("# ").trim().to_string())
                .unwrap_or_else(|| fallback_title.clone());

            let mut metadata = NodeMetadata::new(Utc::now());
            metadata.title = Some(title);
            metadata.tags = vec!["markdown".to_string()];
            Ok(ContentNode::assemble(
                SOURCE_TYPE,
                "markdown",
                &source_id,
                offset as u64,
                NodeContent {
                    text: section,
                    format: ContentFormat::Markdown,
                },
                metadata,
            ))
        }))
    }
}

/// Split on top-level headings, keeping each heading with its section.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.starts_with("# ") && !current.trim().is_empty() {
            sections.push(current.trim_end().to_string());
            current = String::new();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current.trim_end().to_string());
    }

    if sections.is_empty() {
        sections.push(text.trim_end().to_string());
    }
    sections
}
