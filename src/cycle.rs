use std::sync::Arc;

use log::{error, info, warn};

use crate::{
    collector::runner::{self, CollectSettings, CycleReport},
    config::Config,
    error::SnapshotResult,
    fanout,
    instrument::InstrumentSource,
    metrics::{METRICS, RuntimeMetrics},
    sink::CommitSink,
    store::SharedStore,
};

/// Runs collection cycles: resolve → plan → fan out → collect → commit.
///
/// Cheap to clone; every clone shares the same accepted-snapshot store,
/// which lives as long as the process.
#[derive(Clone)]
pub struct Snapshotter {
    config: Arc<Config>,
    source: Arc<dyn InstrumentSource>,
    sink: CommitSink,
    store: SharedStore,
}

impl Snapshotter {
    pub fn new(config: Config, source: Arc<dyn InstrumentSource>, sink: CommitSink) -> Self {
        Self {
            config: Arc::new(config),
            source,
            sink,
            store: SharedStore::new(),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Fire-and-forget entry point for the scheduler.
    pub fn trigger(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.run_cycle().await;
        });
    }

    /// One full cycle. Errors are logged here and returned for callers
    /// that want them; nothing is retried.
    ///
    /// Returns `Ok(None)` when no instrument survived planning.
    pub async fn run_cycle(&self) -> SnapshotResult<Option<CycleReport>> {
        RuntimeMetrics::incr(&METRICS.cycles_started);
        info!("starting collection cycle for {:?}", self.config.tokens);

        let result = self.collect_once().await;
        match &result {
            Ok(Some(report)) => {
                RuntimeMetrics::incr(&METRICS.cycles_committed);
                info!(
                    "cycle committed: {} request(s), {} accepted, {} fresh, {} venue error(s), {} empty",
                    report.requests, report.accepted, report.fresh, report.venue_errors, report.empty
                );
            }
            Ok(None) => {}
            Err(e) if e.is_fatal() => {
                RuntimeMetrics::incr(&METRICS.cycles_abandoned);
                error!("cycle abandoned: {}", e);
            }
            Err(e) => warn!("cycle ended early: {}", e),
        }
        info!("{}", METRICS.summary());
        result
    }

    async fn collect_once(&self) -> SnapshotResult<Option<CycleReport>> {
        let instruments = self.source.resolve(&self.config.tokens).await?;
        let missing = self.config.tokens.len().saturating_sub(instruments.len());

        let (planned, skipped) = fanout::plan_instruments(instruments, &self.config.depths);
        for _ in 0..missing + skipped {
            RuntimeMetrics::incr(&METRICS.instruments_skipped);
        }

        let requests = fanout::build_fanout(&planned);
        if requests.is_empty() {
            warn!("no instrument could be planned, skipping cycle");
            return Ok(None);
        }

        let settings = CollectSettings {
            ws_url: self.config.venue.ws_url.clone(),
            stale_after_ms: self.config.staleness_ms(),
            ping_interval: std::time::Duration::from_secs(self.config.ping_interval_secs),
            timeout: self.config.cycle_timeout(),
            debug: self.config.debug_log(),
        };

        runner::collect(requests, &self.store, &self.sink, &settings)
            .await
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapshotError;
    use crate::instrument::Instrument;
    use crate::sink::testing::MemorySink;

    struct FixedSource(Vec<Instrument>);

    #[async_trait::async_trait]
    impl InstrumentSource for FixedSource {
        async fn resolve(&self, _symbols: &[String]) -> SnapshotResult<Vec<Instrument>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait::async_trait]
    impl InstrumentSource for FailingSource {
        async fn resolve(&self, _symbols: &[String]) -> SnapshotResult<Vec<Instrument>> {
            Err(SnapshotError::Resolution("503".into()))
        }
    }

    fn snapshotter(source: Arc<dyn InstrumentSource>) -> (Snapshotter, Arc<MemorySink>) {
        let mem = Arc::new(MemorySink::default());
        let mut config = Config::default();
        // nothing listens here; reaching the collector would fail loudly
        config.venue.ws_url = "ws://127.0.0.1:9".into();
        let s = Snapshotter::new(config, source, CommitSink::new(mem.clone(), false));
        (s, mem)
    }

    #[tokio::test]
    async fn unplannable_instruments_skip_the_cycle() {
        let (s, mem) = snapshotter(Arc::new(FixedSource(vec![Instrument {
            symbol: "DEAD".into(),
            coin: "@9".into(),
            mid_px: 0.0,
        }])));

        assert!(s.run_cycle().await.unwrap().is_none());
        assert_eq!(mem.count(), 0);
    }

    #[tokio::test]
    async fn resolution_failure_abandons_the_cycle() {
        let (s, mem) = snapshotter(Arc::new(FailingSource));
        let err = s.run_cycle().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Resolution(_)));
        assert_eq!(mem.count(), 0);
    }

    #[tokio::test]
    async fn transport_failure_abandons_without_commit() {
        let (s, mem) = snapshotter(Arc::new(FixedSource(vec![Instrument {
            symbol: "PURR".into(),
            coin: "PURR/USDC".into(),
            mid_px: 0.2,
        }])));

        let err = s.run_cycle().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(mem.count(), 0);
        assert!(s.store().lock().is_empty());
    }
}
