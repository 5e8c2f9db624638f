use std::collections::HashMap;

use log::{debug, warn};
use serde_json::json;

use crate::error::{SnapshotError, SnapshotResult};
use crate::schema::SpotMetaAndAssetCtxs;

/// A spot market resolved at cycle start.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    /// Token symbol from configuration, e.g. "PURR"
    pub symbol: String,

    /// Venue coin name used in l2Book requests, e.g. "PURR/USDC" or "@1"
    pub coin: String,

    /// Reference mid price
    pub mid_px: f64,
}

/// Resolves the instruments to snapshot for one cycle.
///
/// Implementations perform I/O. Everything after resolution is pure until
/// the collector opens its connection.
#[async_trait::async_trait]
pub trait InstrumentSource: Send + Sync {
    async fn resolve(&self, symbols: &[String]) -> SnapshotResult<Vec<Instrument>>;
}

/// `POST /info {"type":"spotMetaAndAssetCtxs"}`
pub struct HttpInstrumentSource {
    client: reqwest::Client,
    info_url: String,
}

impl HttpInstrumentSource {
    pub fn new(info_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            info_url: info_url.into(),
        }
    }

    async fn fetch(&self) -> SnapshotResult<SpotMetaAndAssetCtxs> {
        let res = self
            .client
            .post(&self.info_url)
            .json(&json!({ "type": "spotMetaAndAssetCtxs" }))
            .send()
            .await?
            .error_for_status()?;

        Ok(res.json::<SpotMetaAndAssetCtxs>().await?)
    }
}

#[async_trait::async_trait]
impl InstrumentSource for HttpInstrumentSource {
    async fn resolve(&self, symbols: &[String]) -> SnapshotResult<Vec<Instrument>> {
        let meta = self.fetch().await?;
        Ok(select_instruments(&meta, symbols)
            .into_iter()
            .filter_map(|res| match res {
                Ok(instrument) => Some(instrument),
                Err(e) => {
                    warn!("skipping instrument: {}", e);
                    None
                }
            })
            .collect())
    }
}

/// Joins token names → token index → spot pair (by base token) → market
/// context (by coin).
///
/// Output follows the order of `symbols`. Symbols with no token, no pair
/// or no usable mid price come back as `InvalidInput` so the caller can
/// skip them individually.
pub fn select_instruments(
    meta: &SpotMetaAndAssetCtxs,
    symbols: &[String],
) -> Vec<SnapshotResult<Instrument>> {
    let SpotMetaAndAssetCtxs(spot, ctxs) = meta;

    let token_index: HashMap<&str, u32> = spot
        .tokens
        .iter()
        .map(|t| (t.name.as_str(), t.index))
        .collect();

    let mid_by_coin: HashMap<&str, Option<&str>> = ctxs
        .iter()
        .map(|c| (c.coin.as_str(), c.mid_px.as_deref()))
        .collect();

    symbols
        .iter()
        .map(|symbol| {
            let index = token_index.get(symbol.as_str()).ok_or_else(|| {
                SnapshotError::InvalidInput(format!("unknown token {}", symbol))
            })?;

            let pair = spot
                .universe
                .iter()
                .find(|p| p.tokens.0 == *index)
                .ok_or_else(|| {
                    SnapshotError::InvalidInput(format!("no spot pair for {}", symbol))
                })?;

            let mid = mid_by_coin
                .get(pair.name.as_str())
                .copied()
                .flatten()
                .ok_or_else(|| {
                    SnapshotError::InvalidInput(format!("no mid price for {}", pair.name))
                })?;

            let mid_px: f64 = mid.parse().map_err(|_| {
                SnapshotError::InvalidInput(format!("unparseable mid price {:?} for {}", mid, pair.name))
            })?;

            debug!("resolved {} -> {} @ {}", symbol, pair.name, mid_px);

            Ok(Instrument {
                symbol: symbol.clone(),
                coin: pair.name.clone(),
                mid_px,
            })
        })
        .collect()
}
