use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level structure loaded from `config.json`.
//
// It defines:
// - Venue endpoints (HTTP info + WebSocket)
// - Which tokens are snapshotted and at which depths
// - Staleness policy, schedule and storage
// - Optional debug configuration
//
// Every field has a default, so `{}` is a valid config that
// reproduces the hourly PURR/HFUN/RAGE/POINTS/JEFF collection.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Venue endpoints
    pub venue: VenueConfig,

    /// Token symbols to snapshot (spot token names, e.g. "PURR")
    pub tokens: Vec<String>,

    /// Depth percentages of the mid price that each snapshot must resolve
    pub depths: Vec<f64>,

    /// Minimum age in seconds before a stored (coin, precision) snapshot
    /// may be overwritten
    pub staleness_secs: u64,

    /// Trigger configuration
    pub schedule: ScheduleConfig,

    /// Where committed snapshot sets are written
    pub storage: StorageConfig,

    /// Upper bound on a single cycle. Unset means wait until the
    /// venue closes the connection.
    pub cycle_timeout_secs: Option<u64>,

    /// Keepalive ping interval while a cycle is collecting
    pub ping_interval_secs: u64,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            venue: VenueConfig::default(),
            tokens: ["PURR", "HFUN", "RAGE", "POINTS", "JEFF"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            depths: vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0],
            staleness_secs: 600,
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            cycle_timeout_secs: None,
            ping_interval_secs: 30,
            debug: None,
        }
    }
}

impl Config {
    /// Rejects configurations that could never produce a request.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tokens.is_empty() {
            anyhow::bail!("config: `tokens` must not be empty");
        }
        if self.depths.is_empty() {
            anyhow::bail!("config: `depths` must not be empty");
        }
        if let Some(d) = self.depths.iter().find(|d| !d.is_finite() || **d <= 0.0) {
            anyhow::bail!("config: depth {} is not a positive percentage", d);
        }
        if self.schedule.interval_secs == 0 {
            anyhow::bail!("config: `schedule.interval_secs` must be > 0");
        }
        if self.ping_interval_secs == 0 {
            anyhow::bail!("config: `ping_interval_secs` must be > 0");
        }
        Ok(())
    }

    pub fn staleness_ms(&self) -> i64 {
        (self.staleness_secs as i64).saturating_mul(1000)
    }

    pub fn cycle_timeout(&self) -> Option<Duration> {
        self.cycle_timeout_secs.map(Duration::from_secs)
    }

    pub fn debug_log(&self) -> bool {
        self.debug.as_ref().map_or(false, |d| d.log.unwrap_or(false))
    }
}

// ------------------------------------------------------------
// Venue configuration
// ------------------------------------------------------------
//
// The venue is public and read-only: no keys, no login.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VenueConfig {
    /// HTTP info endpoint used for instrument resolution
    pub info_url: String,

    /// WebSocket endpoint used for the l2Book post requests
    pub ws_url: String,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            info_url: "https://api.hyperliquid.xyz/info".to_string(),
            ws_url: "wss://api.hyperliquid.xyz/ws".to_string(),
        }
    }
}

// ------------------------------------------------------------
// Schedule configuration
// ------------------------------------------------------------
//
// Cycles fire on wall-clock boundaries of `interval_secs`
// (3600 = top of every hour).
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,

    /// Fire one cycle immediately at startup
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_secs: 3600, run_on_start: false }
    }
}

// ------------------------------------------------------------
// Storage configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory, created on first write
    pub dir: PathBuf,

    /// Write `.json.gz` instead of `.json`
    pub gzip: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("./data"), gzip: false }
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Log every raw WebSocket frame at debug level
    pub log: Option<bool>,
}
