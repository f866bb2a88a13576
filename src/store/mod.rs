//! Storage abstraction for the content graph.
//!
//! The [`GraphStore`] trait defines every persistence operation the
//! ingestion, linking, versioning, and search layers need, enabling
//! pluggable backends (SQLite for real archives, in-memory for tests).
//!
//! # Import batches
//!
//! All rows produced by one ingestion run are staged against an open
//! batch and written in a single transaction at
//! [`GraphStore::commit_batch`]. A fatal error or an explicit
//! [`rollback_batch`](GraphStore::rollback_batch) leaves the store
//! exactly as it was before the run started. Staging buffers per batch,
//! so independent ingestion runs only serialize at commit.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | `begin_batch` / `commit_batch` / `rollback_batch` | Atomic import runs |
//! | `stage_node` / `stage_link` / `stage_blob` | Buffer rows into a batch |
//! | `get_node` / `query_nodes` / `get_batch` | Lookup and filtered queries |
//! | `links_from` / `links_to` | Edge traversal primitives |
//! | `append_version` / `versions_of` / `update_node_content` | Edit history |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{
    ContentBlob, ContentLink, ContentNode, ContentVersion, ImportBatch, LinkType, NodeMetadata,
};

/// Filter for [`GraphStore::query_nodes`]. An empty filter matches every
/// node, bounded only by `limit`.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub source_type: Option<String>,
    pub adapter: Option<String>,
    pub batch_id: Option<String>,
    pub limit: Option<usize>,
}

/// Abstract storage backend for the content graph.
///
/// Implementations must be `Send + Sync`; all operations are async so the
/// SQLite backend can suspend at I/O while the in-memory backend returns
/// immediately-ready futures.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Open an import batch and return its id.
    async fn begin_batch(&self, source_type: &str, adapter: &str) -> Result<String, StoreError>;

    /// Stage a node into an open batch. Returns `true` when the id is new
    /// to both the batch and the store; staging an id that already exists
    /// is a successful upsert, not an error.
    async fn stage_node(&self, batch_id: &str, node: &ContentNode) -> Result<bool, StoreError>;

    /// Stage a link into an open batch. Both endpoints must exist in the
    /// store or the same batch by commit time.
    async fn stage_link(&self, batch_id: &str, link: &ContentLink) -> Result<(), StoreError>;

    /// Stage an opaque blob into an open batch.
    async fn stage_blob(&self, batch_id: &str, blob: &ContentBlob) -> Result<(), StoreError>;

    /// Write all staged rows in one transaction and close the batch.
    /// `nodes_skipped` is the caller's count of tolerated per-record
    /// failures, recorded on the batch for auditing.
    async fn commit_batch(
        &self,
        batch_id: &str,
        nodes_skipped: u64,
    ) -> Result<ImportBatch, StoreError>;

    /// Discard an open batch without writing anything.
    async fn rollback_batch(&self, batch_id: &str) -> Result<(), StoreError>;

    async fn get_node(&self, id: &str) -> Result<Option<ContentNode>, StoreError>;

    /// Nodes matching the filter, ordered by `created_at` then id.
    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<ContentNode>, StoreError>;

    async fn get_batch(&self, id: &str) -> Result<Option<ImportBatch>, StoreError>;

    /// Outgoing links of a node, optionally restricted to one link type.
    async fn links_from(
        &self,
        id: &str,
        link_type: Option<LinkType>,
    ) -> Result<Vec<ContentLink>, StoreError>;

    /// Incoming links of a node, optionally restricted to one link type.
    async fn links_to(
        &self,
        id: &str,
        link_type: Option<LinkType>,
    ) -> Result<Vec<ContentLink>, StoreError>;

    /// Append one history row. Version numbering is the version-control
    /// layer's contract; the store only persists.
    async fn append_version(&self, version: &ContentVersion) -> Result<(), StoreError>;

    /// All history rows for a node, ordered by version.
    async fn versions_of(&self, node_id: &str) -> Result<Vec<ContentVersion>, StoreError>;

    /// Update a node's current text and metadata. Reserved for version
    /// control; ingestion never mutates existing nodes.
    async fn update_node_content(
        &self,
        node_id: &str,
        text: &str,
        metadata: &NodeMetadata,
    ) -> Result<(), StoreError>;
}
