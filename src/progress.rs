//! Progress reporting and cooperative cancellation.
//!
//! Both long-running pipelines (ingestion and agent search) report
//! through a reporter trait invoked at a bounded cadence. Progress is
//! emitted on **stderr** so stdout stays parseable for scripts; a JSON
//! mode emits one object per line for machine consumers. Closures
//! implement the reporter traits directly, so library callers can pass
//! `|p| ...` without naming a type.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ingest::IngestProgress;
use crate::search::SearchProgress;

/// Cooperative cancellation flag, checked between node-processing steps
/// in ingestion and between graded candidates in search.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }
}

/// Receives ingestion progress events.
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, progress: &IngestProgress);
}

impl<F> IngestProgressReporter for F
where
    F: Fn(&IngestProgress) + Send + Sync,
{
    fn report(&self, progress: &IngestProgress) {
        self(progress)
    }
}

/// Receives search progress events.
pub trait SearchProgressReporter: Send + Sync {
    fn report(&self, progress: &SearchProgress);
}

impl<F> SearchProgressReporter for F
where
    F: Fn(&SearchProgress) + Send + Sync,
{
    fn report(&self, progress: &SearchProgress) {
        self(progress)
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _progress: &IngestProgress) {}
}

impl SearchProgressReporter for NoProgress {
    fn report(&self, _progress: &SearchProgress) {}
}

/// Human-friendly progress on stderr:
/// `ingest chatgpt  storing  120 created / 4 skipped`.
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, progress: &IngestProgress) {
        let line = format!(
            "ingest {}  {}  {} created / {} linked / {} skipped\n",
            progress.adapter,
            progress.phase.as_str(),
            progress.created,
            progress.linked,
            progress.skipped
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

impl SearchProgressReporter for StderrProgress {
    fn report(&self, progress: &SearchProgress) {
        let line = format!(
            "search {}  graded {} / {}  accepted {} of {}\n",
            progress.phase.as_str(),
            progress.graded,
            progress.searched,
            progress.accepted,
            progress.target
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, progress: &IngestProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "pipeline": "ingest",
            "phase": progress.phase.as_str(),
            "adapter": progress.adapter,
            "created": progress.created,
            "linked": progress.linked,
            "skipped": progress.skipped,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

impl SearchProgressReporter for JsonProgress {
    fn report(&self, progress: &SearchProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "pipeline": "search",
            "phase": progress.phase.as_str(),
            "searched": progress.searched,
            "graded": progress.graded,
            "accepted": progress.accepted,
            "rejected": progress.rejected,
            "target": progress.target,
            "message": progress.message,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn ingest_reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }

    pub fn search_reporter(&self) -> Box<dyn SearchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
