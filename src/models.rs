//! Core data models of the content graph.
//!
//! These types are pure data. Nodes are produced by adapters during
//! ingestion, persisted through the [`GraphStore`](crate::store::GraphStore)
//! trait, and flow unchanged through linking, versioning, and search.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Text format of a node's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Plain,
    Markdown,
    Html,
}

impl ContentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFormat::Plain => "plain",
            ContentFormat::Markdown => "markdown",
            ContentFormat::Html => "html",
        }
    }

    /// Unknown format strings fall back to plain.
    pub fn parse(s: &str) -> ContentFormat {
        match s {
            "markdown" => ContentFormat::Markdown,
            "html" => ContentFormat::Html,
            _ => ContentFormat::Plain,
        }
    }
}

/// Text payload of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeContent {
    pub text: String,
    pub format: ContentFormat,
}

/// Descriptive metadata attached to a node.
///
/// `extra` is the source-specific bag (message role, conversation title,
/// chat name, ...) that adapters may fill without schema changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub word_count: usize,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl NodeMetadata {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            title: None,
            author: None,
            created_at,
            word_count: 0,
            tags: Vec::new(),
            extra: serde_json::Value::Null,
        }
    }
}

/// Provenance of a node: which kind of export it came from, which adapter
/// parsed it, and the record's identifier within the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSource {
    pub source_type: String,
    pub adapter: String,
    pub source_id: String,
}

/// The atomic unit of ingested content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentNode {
    /// Content-addressed id; see [`ContentNode::content_address`].
    pub id: String,
    /// Stable human-addressable locator, e.g. `source://chatgpt/<conv>#<n>`.
    pub uri: String,
    pub content: NodeContent,
    pub metadata: NodeMetadata,
    pub source: NodeSource,
}

impl ContentNode {
    /// Deterministic content address over `(source_type, adapter,
    /// source_id, offset)`, NUL-separated, SHA-256, lowercase hex.
    ///
    /// Re-ingesting the same raw input must produce byte-identical ids,
    /// which is what makes ingestion idempotent.
    pub fn content_address(source_type: &str, adapter: &str, source_id: &str, offset: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(adapter.as_bytes());
        hasher.update([0u8]);
        hasher.update(source_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(offset.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn uri_for(source_type: &str, source_id: &str, offset: u64) -> String {
        format!("source://{}/{}#{}", source_type, source_id, offset)
    }

    /// Build a node with its id, uri, and word count derived from the
    /// provenance and content. The only constructor adapters should use.
    pub fn assemble(
        source_type: &str,
        adapter: &str,
        source_id: &str,
        offset: u64,
        content: NodeContent,
        mut metadata: NodeMetadata,
    ) -> Self {
        metadata.word_count = count_words(&content.text);
        ContentNode {
            id: Self::content_address(source_type, adapter, source_id, offset),
            uri: Self::uri_for(source_type, source_id, offset),
            content,
            metadata,
            source: NodeSource {
                source_type: source_type.to_string(),
                adapter: adapter.to_string(),
                source_id: source_id.to_string(),
            },
        }
    }
}

/// Whitespace-separated word count, shared by node assembly and grading.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Half-open byte span `[start, end)` into a node's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Relationship class of a [`ContentLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Parent,
    Child,
    Sibling,
    Reference,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Parent => "parent",
            LinkType::Child => "child",
            LinkType::Sibling => "sibling",
            LinkType::Reference => "reference",
        }
    }

    pub fn parse(s: &str) -> Option<LinkType> {
        match s {
            "parent" => Some(LinkType::Parent),
            "child" => Some(LinkType::Child),
            "sibling" => Some(LinkType::Sibling),
            "reference" => Some(LinkType::Reference),
            _ => None,
        }
    }
}

/// Directed edge between two node ids. The optional anchor records where
/// in the source text the relation attaches (chunk children carry their
/// byte span into the parent).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLink {
    pub from: String,
    pub to: String,
    pub link_type: LinkType,
    pub anchor: Option<Span>,
}

/// Opaque large payload (e.g. a full raw export), stored apart from the
/// node table. Keyed by content hash; `source_id` ties it back to the
/// export it came from.
#[derive(Debug, Clone)]
pub struct ContentBlob {
    pub id: String,
    pub source_id: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

impl ContentBlob {
    pub fn from_bytes(source_id: &str, media_type: &str, data: Vec<u8>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&data);
        ContentBlob {
            id: format!("{:x}", hasher.finalize()),
            source_id: source_id.to_string(),
            media_type: media_type.to_string(),
            data,
        }
    }
}

/// Why a version row was appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionKind {
    Edit,
    Revert,
    Tombstone,
}

impl VersionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionKind::Edit => "edit",
            VersionKind::Revert => "revert",
            VersionKind::Tombstone => "tombstone",
        }
    }

    pub fn parse(s: &str) -> VersionKind {
        match s {
            "revert" => VersionKind::Revert,
            "tombstone" => VersionKind::Tombstone,
            _ => VersionKind::Edit,
        }
    }
}

/// One append-only history row per node edit. Version numbers are
/// strictly increasing integers starting at 1; history is never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentVersion {
    pub node_id: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub metadata: NodeMetadata,
    pub change_summary: String,
    pub author: String,
    pub kind: VersionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Open,
    Committed,
    RolledBack,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Open => "open",
            BatchStatus::Committed => "committed",
            BatchStatus::RolledBack => "rolledback",
        }
    }

    pub fn parse(s: &str) -> BatchStatus {
        match s {
            "committed" => BatchStatus::Committed,
            "rolledback" => BatchStatus::RolledBack,
            _ => BatchStatus::Open,
        }
    }
}

/// Audit record for one atomic ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub id: String,
    pub source_type: String,
    pub adapter: String,
    pub nodes_created: u64,
    pub nodes_linked: u64,
    pub nodes_skipped: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: BatchStatus,
}

/// Search-time quality grade in `[0, 5]`. Never persisted as graph truth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContentQuality {
    pub overall: f64,
    pub specificity: f64,
    pub coherence: f64,
    pub substance: f64,
}
