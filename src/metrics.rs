use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

/// Global runtime metrics for the snapshotter.
///
/// Purpose:
/// - Track cycle outcomes (committed vs abandoned)
/// - Track request/response traffic per cycle
/// - Track how often the staleness rule suppresses a write
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Cycles
    pub cycles_started: AtomicUsize,
    pub cycles_committed: AtomicUsize,
    pub cycles_abandoned: AtomicUsize,
    pub instruments_skipped: AtomicUsize,

    // Traffic
    pub requests_sent: AtomicUsize,
    pub responses_received: AtomicUsize,

    // Per-response outcomes
    pub snapshots_accepted: AtomicUsize,
    pub snapshots_fresh: AtomicUsize,
    pub venue_errors: AtomicUsize,
    pub empty_books: AtomicUsize,
    pub correlation_misses: AtomicUsize,
    pub duplicates: AtomicUsize,
    pub parse_errors: AtomicUsize,

    // Output
    pub commits_written: AtomicUsize,
    pub commit_errors: AtomicUsize,
}

impl RuntimeMetrics {
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// One-line summary, logged after each cycle.
    pub fn summary(&self) -> String {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        format!(
            "[METRICS] cycles={} committed={} abandoned={} skipped={} sent={} recv={} accepted={} fresh={} venue_err={} empty={} miss={} dup={} parse_err={} writes={} write_err={}",
            get(&self.cycles_started),
            get(&self.cycles_committed),
            get(&self.cycles_abandoned),
            get(&self.instruments_skipped),
            get(&self.requests_sent),
            get(&self.responses_received),
            get(&self.snapshots_accepted),
            get(&self.snapshots_fresh),
            get(&self.venue_errors),
            get(&self.empty_books),
            get(&self.correlation_misses),
            get(&self.duplicates),
            get(&self.parse_errors),
            get(&self.commits_written),
            get(&self.commit_errors),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
