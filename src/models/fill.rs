//! Executed trade (fill) as reported by the venue.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// Single fill of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub instrument: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,

    /// Fill time in milliseconds since the Unix epoch
    pub time_ms: i64,

    /// Transaction hash, when the venue reports one
    #[serde(default)]
    pub hash: Option<String>,

    /// Venue trade id
    #[serde(default)]
    pub trade_id: Option<u64>,

    #[serde(default)]
    pub closed_pnl: Decimal,

    #[serde(default)]
    pub fee: Decimal,
}

impl Fill {
    /// Key used to recognise a fill across polls.
    ///
    /// Prefers the hash; falls back to `{tid}_{coin}` for fills without one.
    pub fn dedup_key(&self) -> String {
        match &self.hash {
            Some(hash) if !hash.is_empty() => hash.clone(),
            _ => format!(
                "{}_{}",
                self.trade_id.map(|t| t.to_string()).unwrap_or_default(),
                self.instrument
            ),
        }
    }
}
