use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ------------------------------------------------------------
// Outbound: l2Book post request
// ------------------------------------------------------------
//
// Hyperliquid WS "post" requests wrap an info request and echo
// the caller-chosen `id` back in the response. That id is the
// only correlation key we use.
//
pub fn l2_book_request(id: u64, coin: &str, n_sig_figs: i32) -> Value {
    json!({
        "method": "post",
        "id": id,
        "request": {
            "type": "info",
            "payload": {
                "type": "l2Book",
                "coin": coin,
                "nSigFigs": n_sig_figs,
            }
        }
    })
}

/// Keepalive frame. The venue answers with `{"channel":"pong"}`.
pub fn ping() -> Value {
    json!({ "method": "ping" })
}

// ------------------------------------------------------------
// Inbound: channel envelope
// ------------------------------------------------------------
//
// Every frame carries a `channel`. Only "post" frames are
// responses to our requests; "pong", "subscriptionResponse"
// and the rest are ignored by the collector.
//
#[derive(Debug, Deserialize)]
pub struct WsEnvelope {
    pub channel: String,

    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct PostData {
    pub id: u64,
    pub response: PostResponse,
}

/// `data.response` of a post frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum PostResponse {
    Info(InfoPayload),
    Error(Value),
}

#[derive(Debug, Deserialize)]
pub struct InfoPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: L2Book,
}

// Source: https://api.hyperliquid.xyz/info {"type":"l2Book"}
#[derive(Debug, Deserialize)]
pub struct L2Book {
    pub coin: String,

    #[serde(default)]
    pub time: u64,

    /// (bids, asks)
    pub levels: (Vec<Level>, Vec<Level>),
}

impl L2Book {
    pub fn best_ask(&self) -> Option<&Level> {
        self.levels.1.first()
    }
}

/// One aggregated price level. Numeric values stay strings so the
/// venue's own formatting (which encodes the bucket size) survives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub px: String,
    pub sz: String,
    pub n: u32,
}

// ------------------------------------------------------------
// HTTP: spotMetaAndAssetCtxs
// ------------------------------------------------------------
//
// Response is a 2-tuple: [meta, contexts].
//
#[derive(Debug, Deserialize)]
pub struct SpotMetaAndAssetCtxs(pub SpotMeta, pub Vec<SpotAssetCtx>);

#[derive(Debug, Deserialize)]
pub struct SpotMeta {
    pub universe: Vec<SpotPair>,
    pub tokens: Vec<SpotToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotPair {
    /// (base_token_index, quote_token_index)
    pub tokens: (u32, u32),

    /// Venue coin name, e.g. "PURR/USDC" or "@1"
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotToken {
    pub name: String,
    pub index: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotAssetCtx {
    pub coin: String,

    /// Null for markets without a two-sided book
    #[serde(default)]
    pub mid_px: Option<String>,
}
