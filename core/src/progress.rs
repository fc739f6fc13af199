use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives byte counts as they land on disk. Implementations are shared by
/// every fetcher of a run and must tolerate concurrent calls.
pub trait ProgressSink: Send + Sync {
    /// `total` is `None` when the origin did not report a length.
    fn start(&self, total: Option<u64>, already: u64);
    fn advance(&self, bytes: u64);
    fn finish(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _total: Option<u64>, _already: u64) {}
    fn advance(&self, _bytes: u64) {}
}

/// Run-wide byte counter fed by all fetchers.
pub struct ProgressTracker {
    downloaded: AtomicU64,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            downloaded: AtomicU64::new(0),
            sink,
        }
    }

    pub fn start(&self, total: Option<u64>, already: u64) {
        self.downloaded.store(already, Ordering::SeqCst);
        self.sink.start(total, already);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
        self.sink.advance(bytes);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        self.sink.finish();
    }
}
