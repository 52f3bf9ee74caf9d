//! Transfer observation and worker sizing.

use std::env;
use std::sync::Arc;

const DEFAULT_WORKERS: usize = 8;
const MAX_WORKERS: usize = 16;

/// Byte-level transfer events. The engine reports; rendering belongs to
/// the caller.
pub trait TransferObserver: Send + Sync {
    /// Called once per transfer before the first chunk. `resume_from` is
    /// non-zero when a staging file left by an earlier attempt is being
    /// continued.
    fn on_start(&self, file: &str, resume_from: u64, expected: u64);

    /// Cumulative bytes staged so far, reported after every chunk.
    fn on_advance(&self, file: &str, transferred: u64);

    /// The blob has been verified and published.
    fn on_finish(&self, file: &str);
}

/// Observer that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_start(&self, _file: &str, _resume_from: u64, _expected: u64) {}
    fn on_advance(&self, _file: &str, _transferred: u64) {}
    fn on_finish(&self, _file: &str) {}
}

pub(crate) type SharedObserver = Arc<dyn TransferObserver>;

/// Worker pool size for snapshot fan-out: the explicit request wins over
/// the `HUBCACHE_WORKERS` override, which wins over the default. The
/// result is clamped and never wider than the file count.
pub(crate) fn snapshot_concurrency(total: usize, requested: Option<usize>) -> usize {
    let from_env = env::var("HUBCACHE_WORKERS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok());
    let ceiling = requested
        .or(from_env)
        .unwrap_or(DEFAULT_WORKERS)
        .clamp(1, MAX_WORKERS);
    ceiling.min(total.max(1))
}
