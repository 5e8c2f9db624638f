// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:     Configuration structs loaded from JSON
// - error:      Failure taxonomy of a collection cycle
// - schema:     Venue wire types (WS post frames, spot meta)
// - util:       Time helpers (now, file stamps, schedule alignment)
// - instrument: Instrument resolution over HTTP
// - planner:    Significant-figure arithmetic
// - fanout:     Per-cycle request list with correlation ids
// - store:      Process-wide accepted-snapshot store
// - collector:  Per-cycle state machine + WebSocket runner
// - sink:       Commit path and persistence
// - cycle:      Cycle orchestration and the trigger entry point
// - metrics:    Lock-free runtime counters
//
mod collector;
mod config;
mod cycle;
mod error;
mod fanout;
mod instrument;
mod metrics;
mod planner;
mod schema;
mod sink;
mod store;
mod util;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use rustls::crypto::{CryptoProvider, ring};

use config::Config;
use cycle::Snapshotter;
use instrument::HttpInstrumentSource;
use sink::{CommitSink, FileSink};

use log::info;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize logging and the rustls crypto backend
// - Load configuration
// - Build the snapshotter (HTTP resolver + file sink)
// - Trigger one cycle per schedule boundary, forever
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation, once, before any TLS connection.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow::anyhow!("failed to install rustls CryptoProvider"))?;

    let path = std::env::var("SNAPSHOTTER_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = load_config(&path)?;

    init_logging(config.debug_log());
    info!("loaded configuration from {}", path);

    let source = Arc::new(HttpInstrumentSource::new(config.venue.info_url.clone()));
    let sink = CommitSink::new(
        Arc::new(FileSink::new(config.storage.dir.clone())),
        config.storage.gzip,
    );

    let interval = Duration::from_secs(config.schedule.interval_secs);
    let run_on_start = config.schedule.run_on_start;
    let snapshotter = Snapshotter::new(config, source, sink);

    if run_on_start {
        snapshotter.trigger();
    }

    // --------------------------------------------------------
    // Scheduler
    //
    // Cycles fire on wall-clock boundaries. Each cycle runs in
    // its own task; a slow or hung cycle never delays the next.
    // --------------------------------------------------------
    loop {
        let delay = util::until_next_boundary(util::now_ms(), interval);
        info!("next cycle in {}s", delay.as_secs());
        sleep(delay).await;

        info!("running at {}", chrono::Utc::now().to_rfc3339());
        snapshotter.trigger();
    }
}

// ------------------------------------------------------------
// Logging
// ------------------------------------------------------------
//
// `RUST_LOG` wins when set. Otherwise `info`, or `debug` for
// this crate when `debug.log` is enabled in config.
//
fn init_logging(debug: bool) {
    let default = if debug {
        "info,hyperliquid_book_snapshotter=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure. A missing file
// means "all defaults".
//
fn load_config(path: &str) -> anyhow::Result<Config> {
    let cfg: Config = match fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(e.into()),
    };
    cfg.validate()?;
    Ok(cfg)
}
