//! Append-only version control for node content.
//!
//! Every mutation of a node goes through [`VersionControl`]: the edit is
//! appended as a history row and the node's current text/metadata are
//! updated in place. History is never rewritten — reverting appends a new
//! version whose content equals the target's, and retirement appends a
//! tombstone. Version numbers are strictly increasing integers starting
//! at 1.
//!
//! Diffs are computed on demand at paragraph granularity: the common
//! prefix and suffix of the two paragraph lists are stripped and the
//! middle is reported as one hunk. Coarse, but deterministic and exactly
//! round-trippable (see [`apply_text_changes`]).

use chrono::Utc;

use crate::error::VersionError;
use crate::models::{count_words, ContentVersion, NodeMetadata, VersionKind};
use crate::store::GraphStore;

/// One reported text difference, in paragraph units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextChange {
    /// Paragraphs inserted at paragraph index `at` of the old text.
    Inserted { at: usize, paragraphs: Vec<String> },
    /// `removed` paragraphs deleted starting at index `at`.
    Removed { at: usize, removed: Vec<String> },
    /// Paragraphs replaced starting at index `at`.
    Replaced {
        at: usize,
        removed: Vec<String>,
        inserted: Vec<String>,
    },
}

/// A changed metadata field, rendered as before/after JSON values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataChange {
    pub field: String,
    pub from: serde_json::Value,
    pub to: serde_json::Value,
}

/// Diff between two versions of one node.
#[derive(Debug, Clone)]
pub struct VersionDiff {
    pub text_changes: Vec<TextChange>,
    pub metadata_changes: Vec<MetadataChange>,
}

/// Version-control operations over a [`GraphStore`].
pub struct VersionControl<'a, S: GraphStore> {
    store: &'a S,
}

impl<'a, S: GraphStore> VersionControl<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Append an edit and update the node's current content. Returns the
    /// new version number.
    pub async fn record_edit(
        &self,
        node_id: &str,
        new_text: &str,
        mut new_metadata: NodeMetadata,
        change_summary: &str,
        author: &str,
    ) -> Result<i64, VersionError> {
        self.append(
            node_id,
            new_text,
            &mut new_metadata,
            change_summary,
            author,
            VersionKind::Edit,
        )
        .await
    }

    /// One specific version, or a typed error when it does not exist.
    pub async fn get_version(
        &self,
        node_id: &str,
        version: i64,
    ) -> Result<ContentVersion, VersionError> {
        self.store
            .versions_of(node_id)
            .await?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or(VersionError::UnknownVersion {
                node_id: node_id.to_string(),
                version,
            })
    }

    /// Full history in version order.
    pub async fn history(&self, node_id: &str) -> Result<Vec<ContentVersion>, VersionError> {
        Ok(self.store.versions_of(node_id).await?)
    }

    /// Revert to an earlier version by appending a new version with that
    /// content. History grows; nothing is deleted.
    pub async fn revert(&self, node_id: &str, to_version: i64) -> Result<i64, VersionError> {
        let target = self.get_version(node_id, to_version).await?;
        let mut metadata = target.metadata.clone();
        self.append(
            node_id,
            &target.content,
            &mut metadata,
            &format!("revert to version {}", to_version),
            &target.author,
            VersionKind::Revert,
        )
        .await
    }

    /// Retire a node by appending a tombstone version. The node and its
    /// links stay in the store so history and link integrity survive.
    pub async fn retire(&self, node_id: &str, author: &str) -> Result<i64, VersionError> {
        let node = self
            .store
            .get_node(node_id)
            .await?
            .ok_or_else(|| VersionError::UnknownNode(node_id.to_string()))?;
        let mut metadata = node.metadata.clone();
        self.append(
            node_id,
            &node.content.text,
            &mut metadata,
            "retired",
            author,
            VersionKind::Tombstone,
        )
        .await
    }

    /// Diff two versions of one node.
    pub async fn diff(
        &self,
        node_id: &str,
        v1: i64,
        v2: i64,
    ) -> Result<VersionDiff, VersionError> {
        let a = self.get_version(node_id, v1).await?;
        let b = self.get_version(node_id, v2).await?;
        Ok(VersionDiff {
            text_changes: diff_text(&a.content, &b.content),
            metadata_changes: diff_metadata(&a.metadata, &b.metadata),
        })
    }

    async fn append(
        &self,
        node_id: &str,
        text: &str,
        metadata: &mut NodeMetadata,
        change_summary: &str,
        author: &str,
        kind: VersionKind,
    ) -> Result<i64, VersionError> {
        self.store
            .get_node(node_id)
            .await?
            .ok_or_else(|| VersionError::UnknownNode(node_id.to_string()))?;

        metadata.word_count = count_words(text);
        let history = self.store.versions_of(node_id).await?;
        let version = history.last().map(|v| v.version).unwrap_or(0) + 1;

        self.store
            .append_version(&ContentVersion {
                node_id: node_id.to_string(),
                version,
                created_at: Utc::now(),
                content: text.to_string(),
                metadata: metadata.clone(),
                change_summary: change_summary.to_string(),
                author: author.to_string(),
                kind,
            })
            .await?;
        self.store
            .update_node_content(node_id, text, metadata)
            .await?;
        Ok(version)
    }
}

fn paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n").map(|p| p.to_string()).collect()
}

/// Paragraph-level diff: strip the common prefix and suffix, report the
/// middle as at most one hunk.
pub fn diff_text(old: &str, new: &str) -> Vec<TextChange> {
    if old == new {
        return Vec::new();
    }
    let old_paras = paragraphs(old);
    let new_paras = paragraphs(new);

    let mut prefix = 0;
    while prefix < old_paras.len()
        && prefix < new_paras.len()
        && old_paras[prefix] == new_paras[prefix]
    {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old_paras.len() - prefix
        && suffix < new_paras.len() - prefix
        && old_paras[old_paras.len() - 1 - suffix] == new_paras[new_paras.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let removed: Vec<String> = old_paras[prefix..old_paras.len() - suffix].to_vec();
    let inserted: Vec<String> = new_paras[prefix..new_paras.len() - suffix].to_vec();

    match (removed.is_empty(), inserted.is_empty()) {
        (true, true) => Vec::new(),
        (true, false) => vec![TextChange::Inserted {
            at: prefix,
            paragraphs: inserted,
        }],
        (false, true) => vec![TextChange::Removed {
            at: prefix,
            removed,
        }],
        (false, false) => vec![TextChange::Replaced {
            at: prefix,
            removed,
            inserted,
        }],
    }
}

/// Apply a reported diff to the old text. `apply_text_changes(old,
/// diff_text(old, new)) == new` always holds — the round-trip property
/// the diff format is designed around.
pub fn apply_text_changes(old: &str, changes: &[TextChange]) -> String {
    let mut paras = paragraphs(old);
    for change in changes {
        match change {
            TextChange::Inserted { at, paragraphs: ins } => {
                paras.splice(*at..*at, ins.iter().cloned());
            }
            TextChange::Removed { at, removed } => {
                paras.splice(*at..*at + removed.len(), std::iter::empty());
            }
            TextChange::Replaced {
                at,
                removed,
                inserted,
            } => {
                paras.splice(*at..*at + removed.len(), inserted.iter().cloned());
            }
        }
    }
    paras.join("\n\n")
}

fn diff_metadata(old: &NodeMetadata, new: &NodeMetadata) -> Vec<MetadataChange> {
    let mut changes = Vec::new();
    let fields: [(&str, serde_json::Value, serde_json::Value); 4] = [
        (
            "title",
            serde_json::json!(old.title),
            serde_json::json!(new.title),
        ),
        (
            "author",
            serde_json::json!(old.author),
            serde_json::json!(new.author),
        ),
        (
            "tags",
            serde_json::json!(old.tags),
            serde_json::json!(new.tags),
        ),
        ("extra", old.extra.clone(), new.extra.clone()),
    ];
    for (field, from, to) in fields {
        if from != to {
            changes.push(MetadataChange {
                field: field.to_string(),
                from,
                to,
            });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentFormat, ContentNode, NodeContent};
    use crate::store::memory::MemoryStore;
    use crate::store::GraphStore;

    async fn seeded_store(text: &str) -> (MemoryStore, String) {
        let store = MemoryStore::new();
        let batch = store.begin_batch("plaintext", "plaintext").await.unwrap();
        let node = ContentNode::assemble(
            "plaintext",
            "plaintext",
            "versioned.txt",
            0,
            NodeContent {
                text: text.to_string(),
                format: ContentFormat::Plain,
            },
            NodeMetadata::new(Utc::now()),
        );
        store.stage_node(&batch, &node).await.unwrap();
        store.commit_batch(&batch, 0).await.unwrap();
        (store, node.id)
    }

    #[tokio::test]
    async fn versions_start_at_one_and_increase() {
        let (store, id) = seeded_store("original").await;
        let vc = VersionControl::new(&store);
        let meta = NodeMetadata::new(Utc::now());

        let v1 = vc
            .record_edit(&id, "first edit", meta.clone(), "edit 1", "ana")
            .await
            .unwrap();
        let v2 = vc
            .record_edit(&id, "second edit", meta.clone(), "edit 2", "ana")
            .await
            .unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);

        let node = store.get_node(&id).await.unwrap().unwrap();
        assert_eq!(node.content.text, "second edit");
        assert_eq!(node.metadata.word_count, 2);
    }

    #[tokio::test]
    async fn revert_appends_instead_of_rewriting() {
        let (store, id) = seeded_store("original").await;
        let vc = VersionControl::new(&store);
        let meta = NodeMetadata::new(Utc::now());

        vc.record_edit(&id, "alpha", meta.clone(), "e1", "ana")
            .await
            .unwrap();
        vc.record_edit(&id, "beta", meta.clone(), "e2", "ana")
            .await
            .unwrap();
        let v3 = vc.revert(&id, 1).await.unwrap();
        assert_eq!(v3, 3);

        let node = store.get_node(&id).await.unwrap().unwrap();
        assert_eq!(node.content.text, "alpha");

        let history = vc.history(&id).await.unwrap();
        assert_eq!(history.len(), 3, "revert grows history");
        assert_eq!(history[2].kind, VersionKind::Revert);
        assert_eq!(history[2].content, history[0].content);
    }

    #[tokio::test]
    async fn retire_appends_a_tombstone() {
        let (store, id) = seeded_store("keep me around").await;
        let vc = VersionControl::new(&store);
        let v = vc.retire(&id, "ana").await.unwrap();
        assert_eq!(v, 1);

        let history = vc.history(&id).await.unwrap();
        assert_eq!(history[0].kind, VersionKind::Tombstone);
        // The node itself survives so links and history stay intact.
        assert!(store.get_node(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn edit_on_unknown_node_is_typed_error() {
        let store = MemoryStore::new();
        let vc = VersionControl::new(&store);
        let err = vc
            .record_edit("ghost", "x", NodeMetadata::new(Utc::now()), "e", "a")
            .await
            .unwrap_err();
        assert!(matches!(err, VersionError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn diff_reports_metadata_changes() {
        let (store, id) = seeded_store("same text").await;
        let vc = VersionControl::new(&store);

        let mut meta = NodeMetadata::new(Utc::now());
        meta.title = Some("before".to_string());
        vc.record_edit(&id, "same text", meta.clone(), "e1", "ana")
            .await
            .unwrap();
        meta.title = Some("after".to_string());
        vc.record_edit(&id, "same text", meta, "e2", "ana")
            .await
            .unwrap();

        let diff = vc.diff(&id, 1, 2).await.unwrap();
        assert!(diff.text_changes.is_empty());
        assert_eq!(diff.metadata_changes.len(), 1);
        assert_eq!(diff.metadata_changes[0].field, "title");
    }

    #[test]
    fn diff_round_trips() {
        let cases = [
            ("a\n\nb\n\nc", "a\n\nb\n\nc"),
            ("a\n\nb\n\nc", "a\n\nX\n\nc"),
            ("a\n\nc", "a\n\nb\n\nc"),
            ("a\n\nb\n\nc", "a\n\nc"),
            ("", "fresh content"),
            ("a\n\nb", "x\n\ny\n\nz"),
        ];
        for (old, new) in cases {
            let changes = diff_text(old, new);
            assert_eq!(
                apply_text_changes(old, &changes),
                new,
                "round-trip failed for {:?} -> {:?}",
                old,
                new
            );
        }
    }

    #[test]
    fn diff_classifies_hunks() {
        assert!(matches!(
            diff_text("a\n\nc", "a\n\nb\n\nc")[0],
            TextChange::Inserted { at: 1, .. }
        ));
        assert!(matches!(
            diff_text("a\n\nb\n\nc", "a\n\nc")[0],
            TextChange::Removed { at: 1, .. }
        ));
        assert!(matches!(
            diff_text("a\n\nb\n\nc", "a\n\nX\n\nc")[0],
            TextChange::Replaced { at: 1, .. }
        ));
        assert!(diff_text("same", "same").is_empty());
    }
}
