//! Error taxonomy for the content graph.
//!
//! Errors that affect a single unit of work ([`ParseError`] on one record)
//! are absorbed and counted by the pipeline; errors that affect the
//! integrity of a whole transaction or the feasibility of a whole
//! operation surface to the caller as typed failures. Grading anomalies
//! are never errors at all — the search agent resolves them to rejections.

use thiserror::Error;

/// A single source record that could not be parsed. Tolerated: the
/// ingestion stream records it and continues with the next record.
#[derive(Debug, Clone, Error)]
#[error("parse error in record '{source_id}': {message}")]
pub struct ParseError {
    pub source_id: String,
    pub message: String,
}

impl ParseError {
    pub fn new(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            message: message.into(),
        }
    }
}

/// Fatal storage failures. Any of these aborts the surrounding import
/// batch, which rolls back wholesale.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error("unknown import batch: {0}")]
    UnknownBatch(String),

    #[error("import batch {0} is no longer open")]
    BatchClosed(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Fatal ingestion failures.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no adapter recognized the input")]
    AdapterNotFound { path_hint: Option<String> },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ingestion cancelled; batch rolled back")]
    Cancelled,
}

/// Fatal search failures. Only the initial endpoint call can fail; the
/// grading and expansion phases are heuristic and never error.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("semantic endpoint returned {status}: {message}")]
    Endpoint { status: u16, message: String },

    #[error("semantic endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Version-control failures.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node {node_id} has no version {version}")]
    UnknownVersion { node_id: String, version: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
