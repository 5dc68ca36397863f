//! Account snapshot: positions and resting orders of one address at one poll tick.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Instrument family on the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    /// Margin / perpetual derivative positions
    Perp,
    /// Spot token balances
    Spot,
}

impl InstrumentClass {
    pub const ALL: [InstrumentClass; 2] = [InstrumentClass::Perp, InstrumentClass::Spot];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentClass::Perp => "perp",
            InstrumentClass::Spot => "spot",
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for InstrumentClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "perp" | "perps" | "derivative" => Ok(Self::Perp),
            "spot" => Ok(Self::Spot),
            other => Err(ConfigError::UnknownInstrumentClass(other.to_string())),
        }
    }
}

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse the venue's one-letter side ("B" bid, "A" ask).
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "B" | "b" => Some(Side::Buy),
            "A" | "a" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn from_is_buy(is_buy: bool) -> Self {
        if is_buy {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Open position in one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument name as used by mids and orders (e.g. "ETH", "@107")
    pub instrument: String,

    pub class: InstrumentClass,

    /// Signed size, negative when short
    pub signed_size: Decimal,

    /// Average entry price (zero when unknown)
    #[serde(default)]
    pub entry_price: Decimal,

    /// Leverage multiplier (1 for spot)
    #[serde(default = "default_leverage")]
    pub leverage: u32,
}

fn default_leverage() -> u32 {
    1
}

impl Position {
    pub fn new(instrument: impl Into<String>, class: InstrumentClass, signed_size: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            class,
            signed_size,
            entry_price: Decimal::ZERO,
            leverage: 1,
        }
    }

    pub fn with_entry(mut self, entry_price: Decimal, leverage: u32) -> Self {
        self.entry_price = entry_price;
        self.leverage = leverage;
        self
    }

    pub fn is_flat(&self) -> bool {
        self.signed_size.is_zero()
    }

}

/// Resting limit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub instrument: String,
    pub class: InstrumentClass,
    pub side: Side,
    pub limit_price: Decimal,
    pub size: Decimal,

    /// Venue-assigned id, only meaningful for cancelling this exact order
    pub order_id: u64,

    /// Placement time in milliseconds since the Unix epoch
    pub placed_at_ms: i64,
}

impl Order {
    pub fn notional(&self) -> Decimal {
        self.limit_price * self.size
    }
}

/// Normalized snapshot of one account.
///
/// Built fresh each tick by a venue adapter. Positions with zero size are
/// never stored, so an instrument is either present with a non-zero size or
/// absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub positions: BTreeMap<String, Position>,
    pub open_orders: Vec<Order>,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a position, dropping it when flat.
    pub fn insert_position(&mut self, position: Position) {
        if position.is_flat() {
            self.positions.remove(&position.instrument);
        } else {
            self.positions.insert(position.instrument.clone(), position);
        }
    }

    /// Signed size held in an instrument (zero when absent).
    pub fn size_of(&self, instrument: &str) -> Decimal {
        self.positions
            .get(instrument)
            .map(|p| p.signed_size)
            .unwrap_or(Decimal::ZERO)
    }

    /// Instrument → signed size for every held position.
    pub fn position_sizes(&self) -> BTreeMap<String, Decimal> {
        self.positions
            .iter()
            .map(|(name, p)| (name.clone(), p.signed_size))
            .collect()
    }

    /// Open orders restricted to the given instrument classes.
    pub fn orders_in<'a>(
        &'a self,
        classes: &'a [InstrumentClass],
    ) -> impl Iterator<Item = &'a Order> + 'a {
        self.open_orders
            .iter()
            .filter(move |o| classes.contains(&o.class))
    }

    /// Keep only positions of the given classes.
    pub fn retain_classes(&mut self, classes: &[InstrumentClass]) {
        self.positions.retain(|_, p| classes.contains(&p.class));
    }
}
