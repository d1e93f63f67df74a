//! In-process job processing statistics.
//!
//! Counts and a running average of handler time per job kind. Not persisted;
//! a restart starts from zero.

use kwharvest_core::JobKind;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Processing figures of one job kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct KindStats {
    /// Jobs that completed.
    pub processed: u64,
    /// Failed attempts (retried or terminal).
    pub failed: u64,
    /// Mean handler time of completed jobs, in milliseconds.
    pub avg_processing_ms: f64,
}

impl KindStats {
    fn record_success(&mut self, elapsed: Duration) {
        self.processed += 1;
        #[allow(clippy::cast_precision_loss)]
        let n = self.processed as f64;
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.avg_processing_ms += (ms - self.avg_processing_ms) / n;
    }
}

/// Processing figures per job kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    /// `fetch_related` jobs.
    pub related: KindStats,
    /// `count_docs` jobs.
    pub docs: KindStats,
}

impl ProcessingStats {
    /// Figures of one kind.
    pub fn of(&self, kind: JobKind) -> &KindStats {
        match kind {
            JobKind::FetchRelated => &self.related,
            JobKind::CountDocs => &self.docs,
        }
    }
}

/// Thread-safe recorder behind [`ProcessingStats`].
#[derive(Debug, Default)]
pub(crate) struct ProcessingRecorder {
    inner: Mutex<HashMap<JobKind, KindStats>>,
}

impl ProcessingRecorder {
    pub(crate) fn success(&self, kind: JobKind, elapsed: Duration) {
        if let Ok(mut stats) = self.inner.lock() {
            stats.entry(kind).or_default().record_success(elapsed);
        }
    }

    pub(crate) fn failure(&self, kind: JobKind) {
        if let Ok(mut stats) = self.inner.lock() {
            stats.entry(kind).or_default().failed += 1;
        }
    }

    pub(crate) fn snapshot(&self) -> ProcessingStats {
        let Ok(stats) = self.inner.lock() else {
            return ProcessingStats::default();
        };
        let get = |kind| stats.get(&kind).copied().unwrap_or_default();
        ProcessingStats {
            related: get(JobKind::FetchRelated),
            docs: get(JobKind::CountDocs),
        }
    }
}
