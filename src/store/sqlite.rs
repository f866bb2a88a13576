//! SQLite-backed [`GraphStore`].
//!
//! One file holds the whole graph: nodes, links, blobs, versions, and
//! batch audit rows. WAL journal mode is enabled so searches can read
//! while an ingestion commits. Migrations are `CREATE TABLE IF NOT
//! EXISTS` statements run at `init`, idempotent by construction.
//!
//! Batch staging is buffered in memory and flushed inside a single sqlx
//! transaction at commit, which is what serializes concurrent ingestion
//! runs without blocking their parse/chunk work.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    BatchStatus, ContentBlob, ContentFormat, ContentLink, ContentNode, ContentVersion, ImportBatch,
    LinkType, NodeContent, NodeMetadata, NodeSource, Span, VersionKind,
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

/// SQLite implementation of the [`GraphStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    pending: Mutex<HashMap<String, PendingBatch>>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`, with WAL mode
    /// and a small connection pool.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Transaction(e.to_string()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema. Idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                uri TEXT NOT NULL,
                source_type TEXT NOT NULL,
                adapter TEXT NOT NULL,
                source_id TEXT NOT NULL,
                text TEXT NOT NULL,
                format TEXT NOT NULL DEFAULT 'plain',
                title TEXT,
                author TEXT,
                created_at INTEGER NOT NULL,
                word_count INTEGER NOT NULL DEFAULT 0,
                tags_json TEXT NOT NULL DEFAULT '[]',
                extra_json TEXT NOT NULL DEFAULT 'null',
                batch_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                link_type TEXT NOT NULL,
                anchor_start INTEGER,
                anchor_end INTEGER,
                batch_id TEXT,
                PRIMARY KEY (from_id, to_id, link_type),
                FOREIGN KEY (from_id) REFERENCES nodes(id),
                FOREIGN KEY (to_id) REFERENCES nodes(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                media_type TEXT NOT NULL,
                data BLOB NOT NULL,
                batch_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS versions (
                node_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                content TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                change_summary TEXT NOT NULL,
                author TEXT NOT NULL,
                kind TEXT NOT NULL,
                PRIMARY KEY (node_id, version),
                FOREIGN KEY (node_id) REFERENCES nodes(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                source_type TEXT NOT NULL,
                adapter TEXT NOT NULL,
                nodes_created INTEGER NOT NULL DEFAULT 0,
                nodes_linked INTEGER NOT NULL DEFAULT 0,
                nodes_skipped INTEGER NOT NULL DEFAULT 0,
                started_at INTEGER NOT NULL,
                finished_at INTEGER,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_source_type ON nodes(source_type)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_batch ON nodes(batch_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_from ON links(from_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_to ON links(to_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_versions_node ON versions(node_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn node_exists(&self, id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    fn closed_or_unknown(&self, batch_id: &str, known: bool) -> StoreError {
        if known {
            StoreError::BatchClosed(batch_id.to_string())
        } else {
            StoreError::UnknownBatch(batch_id.to_string())
        }
    }

    async fn record_batch(
        &self,
        batch: &ImportBatch,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO batches (id, source_type, adapter, nodes_created, nodes_linked,
                                 nodes_skipped, started_at, finished_at, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                nodes_created = excluded.nodes_created,
                nodes_linked = excluded.nodes_linked,
                nodes_skipped = excluded.nodes_skipped,
                finished_at = excluded.finished_at,
                status = excluded.status
            "#,
        )
        .bind(&batch.id)
        .bind(&batch.source_type)
        .bind(&batch.adapter)
        .bind(batch.nodes_created as i64)
        .bind(batch.nodes_linked as i64)
        .bind(batch.nodes_skipped as i64)
        .bind(batch.started_at.timestamp())
        .bind(batch.finished_at.map(|t| t.timestamp()))
        .bind(batch.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn node_from_row(row: &SqliteRow) -> ContentNode {
    let tags: Vec<String> =
        serde_json::from_str(row.get::<String, _>("tags_json").as_str()).unwrap_or_default();
    let extra: serde_json::Value =
        serde_json::from_str(row.get::<String, _>("extra_json").as_str())
            .unwrap_or(serde_json::Value::Null);

    ContentNode {
        id: row.get("id"),
        uri: row.get("uri"),
        content: NodeContent {
            text: row.get("text"),
            format: ContentFormat::parse(row.get::<String, _>("format").as_str()),
        },
        metadata: NodeMetadata {
            title: row.get("title"),
            author: row.get("author"),
            created_at: ts_to_datetime(row.get("created_at")),
            word_count: row.get::<i64, _>("word_count") as usize,
            tags,
            extra,
        },
        source: NodeSource {
            source_type: row.get("source_type"),
            adapter: row.get("adapter"),
            source_id: row.get("source_id"),
        },
    }
}

fn link_from_row(row: &SqliteRow) -> ContentLink {
    let anchor_start: Option<i64> = row.get("anchor_start");
    let anchor_end: Option<i64> = row.get("anchor_end");
    ContentLink {
        from: row.get("from_id"),
        to: row.get("to_id"),
        link_type: LinkType::parse(row.get::<String, _>("link_type").as_str())
            .unwrap_or(LinkType::Reference),
        anchor: anchor_start.zip(anchor_end).map(|(s, e)| Span {
            start: s as usize,
            end: e as usize,
        }),
    }
}

fn batch_from_row(row: &SqliteRow) -> ImportBatch {
    let finished: Option<i64> = row.get("finished_at");
    ImportBatch {
        id: row.get("id"),
        source_type: row.get("source_type"),
        adapter: row.get("adapter"),
        nodes_created: row.get::<i64, _>("nodes_created") as u64,
        nodes_linked: row.get::<i64, _>("nodes_linked") as u64,
        nodes_skipped: row.get::<i64, _>("nodes_skipped") as u64,
        started_at: ts_to_datetime(row.get("started_at")),
        finished_at: finished.map(ts_to_datetime),
        status: BatchStatus::parse(row.get::<String, _>("status").as_str()),
    }
}

fn version_from_row(row: &SqliteRow) -> ContentVersion {
    let metadata: NodeMetadata =
        serde_json::from_str(row.get::<String, _>("metadata_json").as_str())
            .unwrap_or_else(|_| NodeMetadata::new(DateTime::<Utc>::UNIX_EPOCH));
    ContentVersion {
        node_id: row.get("node_id"),
        version: row.get("version"),
        created_at: ts_to_datetime(row.get("created_at")),
        content: row.get("content"),
        metadata,
        change_summary: row.get("change_summary"),
        author: row.get("author"),
        kind: VersionKind::parse(row.get::<String, _>("kind").as_str()),
    }
}

#[async_trait]
impl GraphStore for SqliteStore {
    async fn begin_batch(&self, source_type: &str, adapter: &str) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.pending.lock().unwrap().insert(
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
        // Existence check before taking the lock: no await under the mutex.
        let persisted = self.node_exists(&node.id).await?;
        let known = self.get_batch(batch_id).await?.is_some();

        let mut pending = self.pending.lock().unwrap();
        let batch = pending
            .get_mut(batch_id)
            .ok_or_else(|| self.closed_or_unknown(batch_id, known))?;
        let staged = batch.nodes.iter().any(|n| n.id == node.id);
        let is_new = !persisted && !staged;
        if is_new {
            batch.created += 1;
        }
        batch.nodes.push(node.clone());
        Ok(is_new)
    }

    async fn stage_link(&self, batch_id: &str, link: &ContentLink) -> Result<(), StoreError> {
        let known = self.get_batch(batch_id).await?.is_some();
        let mut pending = self.pending.lock().unwrap();
        let batch = pending
            .get_mut(batch_id)
            .ok_or_else(|| self.closed_or_unknown(batch_id, known))?;
        batch.links.push(link.clone());
        Ok(())
    }

    async fn stage_blob(&self, batch_id: &str, blob: &ContentBlob) -> Result<(), StoreError> {
        let known = self.get_batch(batch_id).await?.is_some();
        let mut pending = self.pending.lock().unwrap();
        let batch = pending
            .get_mut(batch_id)
            .ok_or_else(|| self.closed_or_unknown(batch_id, known))?;
        batch.blobs.push(blob.clone());
        Ok(())
    }

    async fn commit_batch(
        &self,
        batch_id: &str,
        nodes_skipped: u64,
    ) -> Result<ImportBatch, StoreError> {
        let known = self.get_batch(batch_id).await?.is_some();
        let staged = self
            .pending
            .lock()
            .unwrap()
            .remove(batch_id)
            .ok_or_else(|| self.closed_or_unknown(batch_id, known))?;

        let staged_ids: HashSet<&str> = staged.nodes.iter().map(|n| n.id.as_str()).collect();

        let mut tx = self.pool.begin().await?;

        // Links may only reference nodes that exist at commit time.
        for link in &staged.links {
            for endpoint in [&link.from, &link.to] {
                if staged_ids.contains(endpoint.as_str()) {
                    continue;
                }
                let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM nodes WHERE id = ?")
                    .bind(endpoint)
                    .fetch_optional(&mut *tx)
                    .await?;
                if found.is_none() {
                    drop(tx);
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
                    self.record_batch(&record).await?;
                    return Err(StoreError::Transaction(format!(
                        "link references unknown node {}",
                        endpoint
                    )));
                }
            }
        }

        for node in &staged.nodes {
            sqlx::query(
                r#"
                INSERT INTO nodes (id, uri, source_type, adapter, source_id, text, format,
                                   title, author, created_at, word_count, tags_json,
                                   extra_json, batch_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    uri = excluded.uri,
                    text = excluded.text,
                    format = excluded.format,
                    title = excluded.title,
                    author = excluded.author,
                    created_at = excluded.created_at,
                    word_count = excluded.word_count,
                    tags_json = excluded.tags_json,
                    extra_json = excluded.extra_json,
                    batch_id = excluded.batch_id
                "#,
            )
            .bind(&node.id)
            .bind(&node.uri)
            .bind(&node.source.source_type)
            .bind(&node.source.adapter)
            .bind(&node.source.source_id)
            .bind(&node.content.text)
            .bind(node.content.format.as_str())
            .bind(&node.metadata.title)
            .bind(&node.metadata.author)
            .bind(node.metadata.created_at.timestamp())
            .bind(node.metadata.word_count as i64)
            .bind(serde_json::to_string(&node.metadata.tags).unwrap_or_else(|_| "[]".into()))
            .bind(node.metadata.extra.to_string())
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
        }

        for link in &staged.links {
            sqlx::query(
                r#"
                INSERT INTO links (from_id, to_id, link_type, anchor_start, anchor_end, batch_id)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(from_id, to_id, link_type) DO NOTHING
                "#,
            )
            .bind(&link.from)
            .bind(&link.to)
            .bind(link.link_type.as_str())
            .bind(link.anchor.map(|a| a.start as i64))
            .bind(link.anchor.map(|a| a.end as i64))
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
        }

        for blob in &staged.blobs {
            sqlx::query(
                r#"
                INSERT INTO blobs (id, source_id, media_type, data, batch_id)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&blob.id)
            .bind(&blob.source_id)
            .bind(&blob.media_type)
            .bind(&blob.data)
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
        }

        let record = ImportBatch {
            id: batch_id.to_string(),
            source_type: staged.source_type.clone(),
            adapter: staged.adapter.clone(),
            nodes_created: staged.created,
            nodes_linked: staged.links.len() as u64,
            nodes_skipped,
            started_at: staged.started_at,
            finished_at: Some(Utc::now()),
            status: BatchStatus::Committed,
        };

        sqlx::query(
            r#"
            INSERT INTO batches (id, source_type, adapter, nodes_created, nodes_linked,
                                 nodes_skipped, started_at, finished_at, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.source_type)
        .bind(&record.adapter)
        .bind(record.nodes_created as i64)
        .bind(record.nodes_linked as i64)
        .bind(record.nodes_skipped as i64)
        .bind(record.started_at.timestamp())
        .bind(record.finished_at.map(|t| t.timestamp()))
        .bind(record.status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn rollback_batch(&self, batch_id: &str) -> Result<(), StoreError> {
        let staged = self.pending.lock().unwrap().remove(batch_id);
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
                self.record_batch(&record).await
            }
            None if self.get_batch(batch_id).await?.is_some() => Ok(()),
            None => Err(StoreError::UnknownBatch(batch_id.to_string())),
        }
    }

    async fn get_node(&self, id: &str) -> Result<Option<ContentNode>, StoreError> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| node_from_row(&r)))
    }

    async fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<ContentNode>, StoreError> {
        let mut sql = String::from("SELECT * FROM nodes WHERE 1=1");
        if filter.source_type.is_some() {
            sql.push_str(" AND source_type = ?");
        }
        if filter.adapter.is_some() {
            sql.push_str(" AND adapter = ?");
        }
        if filter.batch_id.is_some() {
            sql.push_str(" AND batch_id = ?");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(st) = &filter.source_type {
            query = query.bind(st);
        }
        if let Some(a) = &filter.adapter {
            query = query.bind(a);
        }
        if let Some(b) = &filter.batch_id {
            query = query.bind(b);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(node_from_row).collect())
    }

    async fn get_batch(&self, id: &str) -> Result<Option<ImportBatch>, StoreError> {
        let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| batch_from_row(&r)))
    }

    async fn links_from(
        &self,
        id: &str,
        link_type: Option<LinkType>,
    ) -> Result<Vec<ContentLink>, StoreError> {
        let rows = match link_type {
            Some(t) => {
                sqlx::query("SELECT * FROM links WHERE from_id = ? AND link_type = ?")
                    .bind(id)
                    .bind(t.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM links WHERE from_id = ?")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(link_from_row).collect())
    }

    async fn links_to(
        &self,
        id: &str,
        link_type: Option<LinkType>,
    ) -> Result<Vec<ContentLink>, StoreError> {
        let rows = match link_type {
            Some(t) => {
                sqlx::query("SELECT * FROM links WHERE to_id = ? AND link_type = ?")
                    .bind(id)
                    .bind(t.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM links WHERE to_id = ?")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(link_from_row).collect())
    }

    async fn append_version(&self, version: &ContentVersion) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO versions (node_id, version, created_at, content, metadata_json,
                                  change_summary, author, kind)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&version.node_id)
        .bind(version.version)
        .bind(version.created_at.timestamp())
        .bind(&version.content)
        .bind(serde_json::to_string(&version.metadata).unwrap_or_else(|_| "{}".into()))
        .bind(&version.change_summary)
        .bind(&version.author)
        .bind(version.kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn versions_of(&self, node_id: &str) -> Result<Vec<ContentVersion>, StoreError> {
        let rows = sqlx::query("SELECT * FROM versions WHERE node_id = ? ORDER BY version ASC")
            .bind(node_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(version_from_row).collect())
    }

    async fn update_node_content(
        &self,
        node_id: &str,
        text: &str,
        metadata: &NodeMetadata,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE nodes SET text = ?, title = ?, author = ?, created_at = ?,
                             word_count = ?, tags_json = ?, extra_json = ?
            WHERE id = ?
            "#,
        )
        .bind(text)
        .bind(&metadata.title)
        .bind(&metadata.author)
        .bind(metadata.created_at.timestamp())
        .bind(metadata.word_count as i64)
        .bind(serde_json::to_string(&metadata.tags).unwrap_or_else(|_| "[]".into()))
        .bind(metadata.extra.to_string())
        .bind(node_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownNode(node_id.to_string()));
        }
        Ok(())
    }
}
