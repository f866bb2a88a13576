//! Ingestion pipeline orchestration.
//!
//! Coordinates one full run: adapter detection → stream parse → chunking
//! of oversized nodes → staging into a single import batch → commit.
//! Per-record parse failures are tolerated (recorded and skipped); any
//! store-level failure or cancellation rolls the whole batch back,
//! leaving the store exactly as it was before the run.

use std::time::{Duration, Instant};

use crate::adapters::{AdapterRegistry, RawSource};
use crate::chunk::{self, ChunkPolicy};
use crate::error::{IngestError, ParseError};
use crate::models::{ContentBlob, ContentLink, ContentNode, LinkType, NodeContent};
use crate::progress::{CancelFlag, IngestProgressReporter};
use crate::store::GraphStore;

/// Pipeline phase, surfaced through progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    Detecting,
    Parsing,
    Chunking,
    Storing,
    Done,
    Failed,
}

impl IngestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestPhase::Detecting => "detecting",
            IngestPhase::Parsing => "parsing",
            IngestPhase::Chunking => "chunking",
            IngestPhase::Storing => "storing",
            IngestPhase::Done => "done",
            IngestPhase::Failed => "failed",
        }
    }
}

/// One progress event with running counts.
#[derive(Debug, Clone)]
pub struct IngestProgress {
    pub phase: IngestPhase,
    pub adapter: String,
    pub created: u64,
    pub linked: u64,
    pub skipped: u64,
}

/// Final counts for one ingestion run. `nodes_skipped` equals
/// `errors.len()` so data loss is never invisible.
#[derive(Debug, Clone)]
pub struct IngestionStats {
    pub nodes_created: u64,
    pub nodes_linked: u64,
    pub nodes_skipped: u64,
    pub errors: Vec<ParseError>,
    pub duration: Duration,
}

/// Progress cadence: one event per this many processed records.
pub const PROGRESS_EVERY: u64 = 25;

/// Orchestrates adapter selection, parsing, chunking, and storage.
pub struct IngestionService<'a, S: GraphStore> {
    registry: &'a AdapterRegistry,
    store: &'a S,
    policy: ChunkPolicy,
    keep_raw: bool,
}

impl<'a, S: GraphStore> IngestionService<'a, S> {
    pub fn new(registry: &'a AdapterRegistry, store: &'a S) -> Self {
        Self {
            registry,
            store,
            policy: ChunkPolicy::default(),
            keep_raw: true,
        }
    }

    pub fn with_policy(mut self, policy: ChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether the raw export bytes are kept as a blob for later
    /// export/rebuild. On by default.
    pub fn keep_raw(mut self, keep: bool) -> Self {
        self.keep_raw = keep;
        self
    }

    /// Run one ingestion. The whole run is one import batch: it commits
    /// on success and rolls back on any fatal error or cancellation.
    pub async fn ingest(
        &self,
        input: &RawSource,
        reporter: &dyn IngestProgressReporter,
        cancel: &CancelFlag,
    ) -> Result<IngestionStats, IngestError> {
        let started = Instant::now();
        reporter.report(&IngestProgress {
            phase: IngestPhase::Detecting,
            adapter: String::new(),
            created: 0,
            linked: 0,
            skipped: 0,
        });

        let adapter = self
            .registry
            .detect(input)
            .ok_or_else(|| IngestError::AdapterNotFound {
                path_hint: input.path_hint.clone(),
            })?;
        let adapter_name = adapter.name().to_string();

        let batch_id = self
            .store
            .begin_batch(adapter.source_type(), adapter.name())
            .await?;

        match self
            .run(input, adapter, &adapter_name, &batch_id, reporter, cancel)
            .await
        {
            Ok((created, linked, errors)) => {
                let record = self
                    .store
                    .commit_batch(&batch_id, errors.len() as u64)
                    .await?;
                let stats = IngestionStats {
                    nodes_created: record.nodes_created,
                    nodes_linked: record.nodes_linked,
                    nodes_skipped: record.nodes_skipped,
                    errors,
                    duration: started.elapsed(),
                };
                reporter.report(&IngestProgress {
                    phase: IngestPhase::Done,
                    adapter: adapter_name,
                    created,
                    linked,
                    skipped: stats.nodes_skipped,
                });
                Ok(stats)
            }
            Err(e) => {
                let _ = self.store.rollback_batch(&batch_id).await;
                reporter.report(&IngestProgress {
                    phase: IngestPhase::Failed,
                    adapter: adapter_name,
                    created: 0,
                    linked: 0,
                    skipped: 0,
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        input: &RawSource,
        adapter: &dyn crate::adapters::Adapter,
        adapter_name: &str,
        batch_id: &str,
        reporter: &dyn IngestProgressReporter,
        cancel: &CancelFlag,
    ) -> Result<(u64, u64, Vec<ParseError>), IngestError> {
        let mut created = 0u64;
        let mut linked = 0u64;
        let mut errors: Vec<ParseError> = Vec::new();
        let mut processed = 0u64;
        let mut chunking_reported = false;

        reporter.report(&IngestProgress {
            phase: IngestPhase::Parsing,
            adapter: adapter_name.to_string(),
            created,
            linked,
            skipped: 0,
        });

        if self.keep_raw {
            let source_id = input.file_name().unwrap_or("export").to_string();
            let blob = ContentBlob::from_bytes(&source_id, media_type(input), input.bytes.clone());
            self.store.stage_blob(batch_id, &blob).await?;
        }

        for item in adapter.parse(input) {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            match item {
                Err(parse_error) => errors.push(parse_error),
                Ok(node) => {
                    if self.store.stage_node(batch_id, &node).await? {
                        created += 1;
                    }

                    let spans = chunk::split(&node.content.text, &self.policy);
                    if spans.len() > 1 {
                        if !chunking_reported {
                            chunking_reported = true;
                            reporter.report(&IngestProgress {
                                phase: IngestPhase::Chunking,
                                adapter: adapter_name.to_string(),
                                created,
                                linked,
                                skipped: errors.len() as u64,
                            });
                        }
                        for (index, span) in spans.iter().enumerate() {
                            let child = chunk_node(&node, index, *span);
                            if self.store.stage_node(batch_id, &child).await? {
                                created += 1;
                            }
                            self.store
                                .stage_link(
                                    batch_id,
                                    &ContentLink {
                                        from: node.id.clone(),
                                        to: child.id.clone(),
                                        link_type: LinkType::Child,
                                        anchor: Some(*span),
                                    },
                                )
                                .await?;
                            self.store
                                .stage_link(
                                    batch_id,
                                    &ContentLink {
                                        from: child.id.clone(),
                                        to: node.id.clone(),
                                        link_type: LinkType::Parent,
                                        anchor: Some(*span),
                                    },
                                )
                                .await?;
                            linked += 2;
                        }
                    }
                }
            }

            processed += 1;
            if processed % PROGRESS_EVERY == 0 {
                reporter.report(&IngestProgress {
                    phase: IngestPhase::Storing,
                    adapter: adapter_name.to_string(),
                    created,
                    linked,
                    skipped: errors.len() as u64,
                });
            }
        }

        Ok((created, linked, errors))
    }
}

/// Derive a chunk child node from its parent and span. The child reuses
/// the parent's provenance with a `::chunk` suffix and the byte start
/// offset, so re-ingesting the same export reproduces the same chunk ids.
fn chunk_node(parent: &ContentNode, index: usize, span: crate::models::Span) -> ContentNode {
    let mut metadata = parent.metadata.clone();
    metadata.extra = serde_json::json!({
        "chunkOf": parent.id,
        "chunkIndex": index,
    });
    ContentNode::assemble(
        &parent.source.source_type,
        &parent.source.adapter,
        &format!("{}::chunk", parent.source.source_id),
        span.start as u64,
        NodeContent {
            text: parent.content.text[span.start..span.end].to_string(),
            format: parent.content.format,
        },
        metadata,
    )
}

fn media_type(input: &RawSource) -> &'static str {
    match input.extension().as_deref() {
        Some("json") => "application/json",
        Some("md") | Some("markdown") => "text/markdown",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::store::memory::MemoryStore;
    use crate::store::{GraphStore, NodeFilter};

    fn service_policy() -> ChunkPolicy {
        ChunkPolicy {
            max_chars: 120,
            min_chars: 30,
            target_chars: 90,
        }
    }

    #[tokio::test]
    async fn plaintext_roundtrip_with_chunking() {
        let registry = AdapterRegistry::with_builtins();
        let store = MemoryStore::new();
        let service = IngestionService::new(&registry, &store).with_policy(service_policy());

        let body = "word ".repeat(100);
        let input = RawSource::from_text(body.trim_end(), Some("big.txt"));
        let stats = service
            .ingest(&input, &NoProgress, &CancelFlag::new())
            .await
            .unwrap();

        // One parent plus its chunks, all created fresh.
        assert!(stats.nodes_created > 1);
        assert!(stats.errors.is_empty());
        assert_eq!(stats.nodes_linked, (stats.nodes_created - 1) * 2);

        let parent = store
            .query_nodes(&NodeFilter {
                adapter: Some("plaintext".to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_iter()
            .find(|n| n.source.source_id == "big.txt")
            .unwrap();

        let graph = crate::links::LinkGraph::new(&store);
        let children = graph.children_of(&parent.id).await.unwrap();
        assert_eq!(children.len() as u64, stats.nodes_created - 1);

        // Chunk coverage: children reassemble the parent exactly.
        let rebuilt: String = children.iter().map(|c| c.content.text.as_str()).collect();
        assert_eq!(rebuilt, parent.content.text);
    }

    #[tokio::test]
    async fn reingest_is_idempotent() {
        let registry = AdapterRegistry::with_builtins();
        let store = MemoryStore::new();
        let service = IngestionService::new(&registry, &store);

        let input = RawSource::from_text("short stable note", Some("note.txt"));
        let first = service
            .ingest(&input, &NoProgress, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(first.nodes_created, 1);

        let second = service
            .ingest(&input, &NoProgress, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(second.nodes_created, 0, "second run creates nothing");
        assert_eq!(store.node_count(), 1);
    }

    #[tokio::test]
    async fn no_adapter_fails_before_any_write() {
        let registry = AdapterRegistry::new();
        let store = MemoryStore::new();
        let service = IngestionService::new(&registry, &store);

        let err = service
            .ingest(
                &RawSource::from_text("anything", None),
                &NoProgress,
                &CancelFlag::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::AdapterNotFound { .. }));
        assert_eq!(store.node_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_rolls_back() {
        let registry = AdapterRegistry::with_builtins();
        let store = MemoryStore::new();
        let service = IngestionService::new(&registry, &store);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = service
            .ingest(
                &RawSource::from_text("will never land", Some("doomed.txt")),
                &NoProgress,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
        assert_eq!(store.node_count(), 0);
    }

    #[tokio::test]
    async fn parse_errors_are_counted_not_fatal() {
        let registry = AdapterRegistry::with_builtins();
        let store = MemoryStore::new();
        let service = IngestionService::new(&registry, &store);

        let export = serde_json::json!([
            {"id": "c1", "title": "ok", "mapping": {
                "m1": {"message": {"author": {"role": "user"}, "create_time": 1.0,
                       "content": {"content_type": "text", "parts": ["a real message"]}}}}},
            42
        ])
        .to_string();
        let input = RawSource::from_text(&export, Some("conversations.json"));

        let stats = service
            .ingest(&input, &NoProgress, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(stats.nodes_created, 1);
        assert_eq!(stats.nodes_skipped, 1);
        assert_eq!(stats.errors.len(), 1);
    }
}
