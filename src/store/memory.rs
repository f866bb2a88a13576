//! In-memory [`GraphStore`] implementation for tests and ephemeral use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Batch staging and commit follow the same contract as the SQLite
//! backend: staged rows are invisible until commit, and a rollback (or a
//! failed commit) leaves the visible maps untouched.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    BatchStatus, ContentBlob, ContentLink, ContentNode, ContentVersion, ImportBatch, LinkType,
    NodeMetadata,
};

use super::{GraphStore, NodeFilter};

struct PendingBatch {
    source_type: String,
    adapter: String,
    started_at: DateTime<Utc>,
    nodes: Vec<ContentNode>,
    links: Vec<ContentLink>,
    blobs: Vec<ContentBlob>,
    created: u64,
}

/// In-memory store for tests and ephemeral pipelines.
pub struct MemoryStore {
    nodes: RwLock<HashMap<String, ContentNode>>,
    node_batch: RwLock<HashMap<String, String>>,
    links: RwLock<Vec<ContentLink>>,
    blobs: RwLock<HashMap<String, ContentBlob>>,
    versions: RwLock<HashMap<String, Vec<ContentVersion>>>,
    batches: RwLock<HashMap<String, ImportBatch>>,
    pending: RwLock<HashMap<String, PendingBatch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            node_batch: RwLock::new(HashMap::new()),
            links: RwLock::new(Vec::new()),
            blobs: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
            batches: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Total node count, handy in tests.
    pub fn node_count(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    fn closed_or_unknown(&self, batch_id: &str) -> StoreError {
        if self.batches.read().unwrap().contains_key(batch_id) {
            StoreError::BatchClosed(batch_id.to_string())
        } else {
            StoreError::UnknownBatch(batch_id.to_string())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn begin_batch(&self, source_type: &str, adapter: &str) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.pending.write().unwrap().insert(
            id.clone(),
            PendingBatch {
                source_type: source_type.to_string(),
                adapter: adapter.to_string(),
                started_at: Utc::now(),
                nodes: Vec::new(),
                links: Vec::new(),
                blobs: Vec::new(),
                created: 0,
            },
        );
        Ok(id)
    }

    async fn stage_node(&self, batch_id: &str, node: &ContentNode) -> Result<bool, StoreError> {
        let persisted = self.nodes.read().unwrap().contains_key(&node.id);
        let mut pending = self.pending.write().unwrap();
        let batch = pending
            .get_mut(batch_id)
            .ok_or_else(|| self.closed_or_unknown(batch_id))?;
        let staged = batch.nodes.iter().any(|n| n.id == node.id);
        let is_new = !persisted && !staged;
        if is_new {
            batch.created += 1;
        }
        batch.nodes.push(node.clone());
        Ok(is_new)
    }

    async fn stage_link(&self, batch_id: &str, link: &ContentLink) -> Result<(), StoreError> {
        let mut pending = self.pending.write().unwrap();
        let batch = pending
            .get_mut(batch_id)
            .ok_or_else(|| self.closed_or_unknown(batch_id))?;
        batch.links.push(link.clone());
        Ok(())
    }

    async fn stage_blob(&self, batch_id: &str, blob: &ContentBlob) -> Result<(), StoreError> {
        let mut pending = self.pending.write().unwrap();
        let batch = pending
            .get_mut(batch_id)
            .ok_or_else(|| self.closed_or_unknown(batch_id))?;
        batch.blobs.push(blob.clone());
        Ok(())
    }

    async fn commit_batch(
        &self,
        batch_id: &str,
        nodes_skipped: u64,
    ) -> Result<ImportBatch, StoreError> {
        let staged = self
            .pending
            .write()
            .unwrap()
            .remove(batch_id)
            .ok_or_else(|| self.closed_or_unknown(batch_id))?;

        // Links may only reference nodes that exist at commit time, either
        // already persisted or staged in this same batch.
        let staged_ids: HashSet<&str> = staged.nodes.iter().map(|n| n.id.as_str()).collect();
        {
            let nodes = self.nodes.read().unwrap();
            for link in &staged.links {
                for endpoint in [&link.from, &link.to] {
                    if !staged_ids.contains(endpoint.as_str()) && !nodes.contains_key(endpoint) {
                        let record = ImportBatch {
                            id: batch_id.to_string(),
                            source_type: staged.source_type.clone(),
                            adapter: staged.adapter.clone(),
                            nodes_created: 0,
                            nodes_linked: 0,
                            nodes_skipped,
                            started_at: staged.started_at,
                            finished_at: Some(Utc::now()),
                            status: BatchStatus::RolledBack,
                        };
                        drop(nodes);
                        self.batches
                            .write()
                            .unwrap()
                            .insert(batch_id.to_string(), record);
                        return Err(StoreError::Transaction(format!(
                            "link references unknown node {}",
                            endpoint
                        )));
                    }
                }
            }
        }

        let nodes_linked = staged.links.len() as u64;
        {
            let mut nodes = self.nodes.write().unwrap();
            let mut node_batch = self.node_batch.write().unwrap();
            for node in staged.nodes {
                node_batch.insert(node.id.clone(), batch_id.to_string());
                nodes.insert(node.id.clone(), node);
            }
        }
        {
            let mut links = self.links.write().unwrap();
            for link in staged.links {
                let exists = links.iter().any(|l| {
                    l.from == link.from && l.to == link.to && l.link_type == link.link_type
                });
                if !exists {
                    links.push(link);
                }
            }
        }
        {
            let mut blobs = self.blobs.write().unwrap();
            for blob in staged.blobs {
                blobs.insert(blob.id.clone(), blob);
            }
        }

        let record = ImportBatch {
            id: batch_id.to_string(),
            source_type: staged.source_type,
            adapter: staged.adapter,
            nodes_created: staged.created,
            nodes_linked,
            nodes_skipped,
            started_at: staged.started_at,
            finished_at: Some(Utc::now()),
            status: BatchStatus::Committed,
        };
        self.batches
            .write()
            .unwrap()
            .insert(batch_id.to_string(), record.clone());
        Ok(record)
    }

    async fn rollback_batch(&self, batch_id: &str) -> Result<(), StoreError> {
        let staged = self.pending.write().unwrap().remove(batch_id);
        match staged {
            Some(staged) => {
                let record = ImportBatch {
                    id: batch_id.to_string(),
                    source_type: staged.source_type,
                    adapter: staged.adapter,
                    nodes_created: 0,
                    nodes_linked: 0,
                    nodes_skipped: 0,
                    started_at: staged.started_at,
                    finished_at: Some(Utc::now()),
                    status: BatchStatus::RolledBack,
                };
                self.batches
                    .write()
                    .unwrap()
                    .insert(batch_id.to_string(), record);
                Ok(())
            }
            // Already closed (e.g. by a failed commit): nothing to undo.
            None if self.batches.read().unwrap().contains_key(batch_id) => Ok(()),
            None => Err(StoreError::UnknownBatch(batch_id.to_string())),
        }
    }

    async fn get_node(&self, id: &str) -> Result<Option<ContentNode>, StoreError> {
        Ok(self.nodes.read().unwrap().get(id).cloned())
    }

    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<ContentNode>, StoreError> {
        let node_batch = self.node_batch.read().unwrap();
        let mut out: Vec<ContentNode> = self
            .nodes
            .read()
            .unwrap()
            .values()
            .filter(|n| {
                filter
                    .source_type
                    .as_deref()
                    .map_or(true, |st| n.source.source_type == st)
                    && filter
                        .adapter
                        .as_deref()
                        .map_or(true, |a| n.source.adapter == a)
                    && filter.batch_id.as_deref().map_or(true, |b| {
                        node_batch.get(&n.id).map(|s| s.as_str()) == Some(b)
                    })
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn get_batch(&self, id: &str) -> Result<Option<ImportBatch>, StoreError> {
        Ok(self.batches.read().unwrap().get(id).cloned())
    }

    async fn links_from(
        &self,
        id: &str,
        link_type: Option<LinkType>,
    ) -> Result<Vec<ContentLink>, StoreError> {
        Ok(self
            .links
            .read()
            .unwrap()
            .iter()
            .filter(|l| l.from == id && link_type.map_or(true, |t| l.link_type == t))
            .cloned()
            .collect())
    }

    async fn links_to(
        &self,
        id: &str,
        link_type: Option<LinkType>,
    ) -> Result<Vec<ContentLink>, StoreError> {
        Ok(self
            .links
            .read()
            .unwrap()
            .iter()
            .filter(|l| l.to == id && link_type.map_or(true, |t| l.link_type == t))
            .cloned()
            .collect())
    }

    async fn append_version(&self, version: &ContentVersion) -> Result<(), StoreError> {
        self.versions
            .write()
            .unwrap()
            .entry(version.node_id.clone())
            .or_default()
            .push(version.clone());
        Ok(())
    }

    async fn versions_of(&self, node_id: &str) -> Result<Vec<ContentVersion>, StoreError> {
        let mut out = self
            .versions
            .read()
            .unwrap()
            .get(node_id)
            .cloned()
            .unwrap_or_default();
        out.sort_by_key(|v| v.version);
        Ok(out)
    }

    async fn update_node_content(
        &self,
        node_id: &str,
        text: &str,
        metadata: &NodeMetadata,
    ) -> Result<(), StoreError> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| StoreError::UnknownNode(node_id.to_string()))?;
        node.content.text = text.to_string();
        node.metadata = metadata.clone();
        Ok(())
    }
}
