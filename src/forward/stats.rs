use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one engine instance.
#[derive(Debug, Default)]
pub(crate) struct EngineStats {
    pub(crate) fetched: AtomicU64,
    pub(crate) enqueued: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) skipped_in_flight: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) handler_errors: AtomicU64,
    pub(crate) queued_writes: AtomicU64,
    pub(crate) inline_writes: AtomicU64,
    pub(crate) write_failures: AtomicU64,
}

impl EngineStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            fetched: get(&self.fetched),
            enqueued: get(&self.enqueued),
            dropped: get(&self.dropped),
            skipped_in_flight: get(&self.skipped_in_flight),
            processed: get(&self.processed),
            handler_errors: get(&self.handler_errors),
            queued_writes: get(&self.queued_writes),
            inline_writes: get(&self.inline_writes),
            write_failures: get(&self.write_failures),
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Uploads returned by the fetch function.
    pub fetched: u64,
    /// Uploads admitted to the forwarding queue.
    pub enqueued: u64,
    /// Uploads dropped because the forwarding queue was full.
    pub dropped: u64,
    /// Uploads skipped because the same id was still in flight.
    pub skipped_in_flight: u64,
    /// Uploads taken off the queue by a worker.
    pub processed: u64,
    /// Handler calls that returned an error.
    pub handler_errors: u64,
    /// Storage writes handed to the DB writer.
    pub queued_writes: u64,
    /// Storage writes run inline by a worker.
    pub inline_writes: u64,
    /// Storage writes that returned an error or panicked.
    pub write_failures: u64,
}
