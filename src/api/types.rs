//! Raw request/response shapes of the Hyperliquid info and exchange endpoints.
//!
//! Numbers arrive as strings; conversion to [`Decimal`](rust_decimal::Decimal)
//! happens in the venue normalizer, not here.

use serde::{Deserialize, Serialize};

/// Body of a POST to `/info`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InfoRequest {
    Meta,
    SpotMeta,
    AllMids,
    ClearinghouseState { user: String },
    SpotClearinghouseState { user: String },
    OpenOrders { user: String },
    UserFills { user: String },
}

// ==== Metadata ====

/// Response of `{"type": "meta"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub universe: Vec<PerpAssetMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerpAssetMeta {
    pub name: String,
    pub sz_decimals: u32,
}

/// Response of `{"type": "spotMeta"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotMeta {
    pub universe: Vec<SpotPairMeta>,
    pub tokens: Vec<SpotTokenMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotPairMeta {
    pub name: String,
    /// [base token index, quote token index]
    pub tokens: Vec<u32>,
    pub index: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotTokenMeta {
    pub name: String,
    pub sz_decimals: u32,
    pub index: u32,
}

// ==== Account state ====

/// Response of `{"type": "clearinghouseState"}` (perp account).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    #[serde(default)]
    pub asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPosition {
    pub position: PerpPosition,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerpPosition {
    pub coin: String,
    /// Signed size
    pub szi: String,
    #[serde(default)]
    pub entry_px: Option<String>,
    #[serde(default)]
    pub leverage: Option<Leverage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Leverage {
    #[serde(default)]
    pub value: Option<u32>,
}

/// Response of `{"type": "spotClearinghouseState"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotClearinghouseState {
    #[serde(default)]
    pub balances: Vec<SpotBalance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotBalance {
    /// Token name ("USDC", "HYPE", ...)
    pub coin: String,
    pub total: String,
    #[serde(default)]
    pub entry_ntl: Option<String>,
}

/// Entry of `{"type": "openOrders"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub coin: String,
    /// "B" (bid) or "A" (ask)
    pub side: String,
    pub limit_px: String,
    pub sz: String,
    pub oid: u64,
    pub timestamp: i64,
}

/// Entry of `{"type": "userFills"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFill {
    pub coin: String,
    pub px: String,
    pub sz: String,
    pub side: String,
    pub time: i64,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub tid: Option<u64>,
    #[serde(default)]
    pub closed_pnl: Option<String>,
    #[serde(default)]
    pub fee: Option<String>,
}

// ==== Exchange ====

/// Top-level response of a POST to `/exchange`.
///
/// `response` is a string on `"err"` and an object on `"ok"`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    pub status: String,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponseBody {
    #[serde(default)]
    pub data: Option<StatusesData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusesData {
    pub statuses: Vec<ExchangeStatus>,
}

/// Per-order (or per-cancel) outcome.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExchangeStatus {
    Resting { resting: RestingStatus },
    Filled { filled: FilledStatus },
    Error { error: String },
    /// Plain string status, "success" for cancels
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RestingStatus {
    pub oid: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledStatus {
    pub oid: u64,
    pub total_sz: String,
    pub avg_px: String,
}
