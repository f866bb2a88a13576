//! Relationship layer over the store: parent/child/sibling traversal and
//! naive temporal clustering.
//!
//! [`LinkGraph`] is a borrowed view — it owns nothing and issues only
//! read queries, so any number can coexist over one store. Clustering is
//! deliberately cheap: group by source type, then split on timestamp
//! gaps. It approximates "same conversation or episode" without any
//! similarity computation.

use std::collections::HashMap;

use chrono::Duration;

use crate::error::StoreError;
use crate::models::{ContentLink, ContentNode, LinkType};
use crate::store::GraphStore;

/// Traversal direction for [`LinkGraph::traverse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow parent links toward the root.
    Up,
    /// Follow child links, first child at each level.
    Down,
}

/// Default gap that starts a new sub-cluster.
pub const DEFAULT_CLUSTER_WINDOW_DAYS: i64 = 7;

/// Read-only relationship view over a [`GraphStore`].
pub struct LinkGraph<'a, S: GraphStore> {
    store: &'a S,
}

impl<'a, S: GraphStore> LinkGraph<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// The node's parent, if it has one.
    pub async fn parent_of(&self, id: &str) -> Result<Option<ContentNode>, StoreError> {
        let links = self.store.links_from(id, Some(LinkType::Parent)).await?;
        match links.first() {
            Some(link) => self.store.get_node(&link.to).await,
            None => Ok(None),
        }
    }

    /// The node's children in anchor order (chunk order for split nodes).
    pub async fn children_of(&self, id: &str) -> Result<Vec<ContentNode>, StoreError> {
        let mut links = self.store.links_from(id, Some(LinkType::Child)).await?;
        links.sort_by_key(link_order);
        let mut out = Vec::with_capacity(links.len());
        for link in &links {
            if let Some(node) = self.store.get_node(&link.to).await? {
                out.push(node);
            }
        }
        Ok(out)
    }

    /// Nodes sharing the same parent, excluding the node itself.
    pub async fn siblings_of(&self, id: &str) -> Result<Vec<ContentNode>, StoreError> {
        let parent = match self.parent_of(id).await? {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        let mut siblings = self.children_of(&parent.id).await?;
        siblings.retain(|n| n.id != id);
        Ok(siblings)
    }

    /// Ordered path from the node, following parents up or first children
    /// down, at most `max_depth` steps. The starting node is included.
    pub async fn traverse(
        &self,
        id: &str,
        direction: Direction,
        max_depth: usize,
    ) -> Result<Vec<ContentNode>, StoreError> {
        let mut path = Vec::new();
        let Some(start) = self.store.get_node(id).await? else {
            return Ok(path);
        };
        let mut current = start.id.clone();
        path.push(start);

        for _ in 0..max_depth {
            let next = match direction {
                Direction::Up => self.parent_of(&current).await?,
                Direction::Down => self.children_of(&current).await?.into_iter().next(),
            };
            match next {
                Some(node) => {
                    current = node.id.clone();
                    path.push(node);
                }
                None => break,
            }
        }
        Ok(path)
    }
}

fn link_order(link: &ContentLink) -> (usize, String) {
    (
        link.anchor.map(|a| a.start).unwrap_or(usize::MAX),
        link.to.clone(),
    )
}

/// Group nodes by source type, then split each group on `created_at`
/// gaps wider than `window`. Labels are `"{source_type}-{n}"`. Pure and
/// deterministic — same input, same labels.
pub fn cluster(nodes: &[ContentNode], window: Duration) -> HashMap<String, String> {
    // Deterministic group order, so label numbering is stable too.
    let mut by_type: Vec<(&str, Vec<&ContentNode>)> = Vec::new();
    let mut sorted: Vec<&ContentNode> = nodes.iter().collect();
    sorted.sort_by(|a, b| {
        a.source
            .source_type
            .cmp(&b.source.source_type)
            .then_with(|| a.metadata.created_at.cmp(&b.metadata.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    for node in sorted {
        match by_type.last_mut() {
            Some((st, group)) if *st == node.source.source_type => group.push(node),
            _ => by_type.push((node.source.source_type.as_str(), vec![node])),
        }
    }

    let mut labels = HashMap::new();
    for (source_type, group) in by_type {
        let mut sub = 0usize;
        let mut prev = None;
        for node in group {
            if let Some(prev_ts) = prev {
                if node.metadata.created_at - prev_ts > window {
                    sub += 1;
                }
            }
            prev = Some(node.metadata.created_at);
            labels.insert(node.id.clone(), format!("{}-{}", source_type, sub));
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentFormat, NodeContent, NodeMetadata};
    use crate::store::memory::MemoryStore;
    use crate::store::GraphStore;
    use chrono::{TimeZone, Utc};

    fn node_at(source_type: &str, offset: u64, days: i64) -> ContentNode {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::days(days);
        ContentNode::assemble(
            source_type,
            source_type,
            "cluster-test",
            offset,
            NodeContent {
                text: format!("node {}", offset),
                format: ContentFormat::Plain,
            },
            NodeMetadata::new(created),
        )
    }

    #[test]
    fn close_timestamps_share_a_cluster() {
        let nodes = vec![node_at("chatgpt", 0, 0), node_at("chatgpt", 1, 3)];
        let labels = cluster(&nodes, Duration::days(DEFAULT_CLUSTER_WINDOW_DAYS));
        assert_eq!(labels[&nodes[0].id], labels[&nodes[1].id]);
        assert_eq!(labels[&nodes[0].id], "chatgpt-0");
    }

    #[test]
    fn wide_gap_starts_a_new_sub_cluster() {
        let nodes = vec![
            node_at("chatgpt", 0, 0),
            node_at("chatgpt", 1, 3),
            node_at("chatgpt", 2, 20),
        ];
        let labels = cluster(&nodes, Duration::days(DEFAULT_CLUSTER_WINDOW_DAYS));
        assert_eq!(labels[&nodes[0].id], "chatgpt-0");
        assert_eq!(labels[&nodes[1].id], "chatgpt-0");
        assert_eq!(labels[&nodes[2].id], "chatgpt-1");
    }

    #[test]
    fn source_types_never_mix() {
        let nodes = vec![node_at("chatgpt", 0, 0), node_at("telegram", 0, 0)];
        let labels = cluster(&nodes, Duration::days(DEFAULT_CLUSTER_WINDOW_DAYS));
        assert_ne!(labels[&nodes[0].id], labels[&nodes[1].id]);
    }

    #[test]
    fn exact_window_gap_is_same_cluster() {
        // The boundary is "gap exceeds the window", so exactly 7 days stays.
        let nodes = vec![node_at("chatgpt", 0, 0), node_at("chatgpt", 1, 7)];
        let labels = cluster(&nodes, Duration::days(7));
        assert_eq!(labels[&nodes[0].id], labels[&nodes[1].id]);
    }

    #[tokio::test]
    async fn family_traversal() {
        use crate::models::{ContentLink, LinkType, Span};

        let store = MemoryStore::new();
        let batch = store.begin_batch("plaintext", "plaintext").await.unwrap();

        let parent = node_at("plaintext", 0, 0);
        let child_a = node_at("plaintext", 1, 0);
        let child_b = node_at("plaintext", 2, 0);
        for n in [&parent, &child_a, &child_b] {
            store.stage_node(&batch, n).await.unwrap();
        }
        for (child, span) in [(&child_a, (0, 4)), (&child_b, (4, 8))] {
            store
                .stage_link(
                    &batch,
                    &ContentLink {
                        from: parent.id.clone(),
                        to: child.id.clone(),
                        link_type: LinkType::Child,
                        anchor: Some(Span {
                            start: span.0,
                            end: span.1,
                        }),
                    },
                )
                .await
                .unwrap();
            store
                .stage_link(
                    &batch,
                    &ContentLink {
                        from: child.id.clone(),
                        to: parent.id.clone(),
                        link_type: LinkType::Parent,
                        anchor: Some(Span {
                            start: span.0,
                            end: span.1,
                        }),
                    },
                )
                .await
                .unwrap();
        }
        store.commit_batch(&batch, 0).await.unwrap();

        let graph = LinkGraph::new(&store);
        assert_eq!(
            graph.parent_of(&child_a.id).await.unwrap().unwrap().id,
            parent.id
        );

        let children = graph.children_of(&parent.id).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id, child_a.id, "children come in anchor order");

        let siblings = graph.siblings_of(&child_a.id).await.unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].id, child_b.id);

        let up = graph.traverse(&child_b.id, Direction::Up, 5).await.unwrap();
        assert_eq!(up.len(), 2);
        assert_eq!(up[1].id, parent.id);

        let down = graph
            .traverse(&parent.id, Direction::Down, 1)
            .await
            .unwrap();
        assert_eq!(down.len(), 2);
        assert_eq!(down[1].id, child_a.id);
    }
}
