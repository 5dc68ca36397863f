//! Copy-trading configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::InstrumentClass;

/// Placeholder shipped in sample env files; treated as "no key".
pub const PLACEHOLDER_PRIVATE_KEY: &str = "YourPrivateKeyHere";

/// How target position sizes are translated into goals for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// goal = target size × ratio ("full")
    #[serde(rename = "full")]
    Absolute,
    /// goal = my baseline + (target size − target baseline) × ratio ("order")
    #[serde(rename = "order")]
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Absolute => "full",
            SyncMode::Incremental => "order",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" | "absolute" => Ok(Self::Absolute),
            "order" | "incremental" => Ok(Self::Incremental),
            other => Err(ConfigError::UnknownSyncMode(other.to_string())),
        }
    }
}

/// Configuration for the copy loop and both reconcilers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Address whose account is mirrored
    pub target_address: String,

    /// Scale factor applied to every target size (must be > 0)
    pub copy_ratio: Decimal,

    /// Price tolerance for market adjustments (0.0 to 1.0)
    pub max_slippage: Decimal,

    pub sync_mode: SyncMode,

    /// Seconds between poll ticks
    pub poll_interval_secs: u64,

    /// Instrument classes to mirror
    pub instrument_classes: Vec<InstrumentClass>,

    /// Minimum notional (USD) of a position adjustment
    pub usd_threshold: Decimal,

    /// Size differences below this are ignored
    pub dust_threshold: Decimal,

    /// Pause between consecutive order placements
    pub order_delay_ms: u64,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            target_address: String::new(),
            copy_ratio: dec!(0.1),          // Mirror at 10%
            max_slippage: dec!(0.02),       // 2% slippage
            sync_mode: SyncMode::Absolute,
            poll_interval_secs: 5,
            instrument_classes: InstrumentClass::ALL.to_vec(),
            usd_threshold: dec!(10),        // Venue minimum order value
            dust_threshold: dec!(0.0001),
            order_delay_ms: 100,
        }
    }
}

impl CopyConfig {
    /// Check the invariants the reconcilers rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_address.trim().is_empty() {
            return Err(ConfigError::MissingTarget);
        }
        if self.copy_ratio <= Decimal::ZERO {
            return Err(ConfigError::InvalidCopyRatio(self.copy_ratio));
        }
        if self.max_slippage < Decimal::ZERO || self.max_slippage >= Decimal::ONE {
            return Err(ConfigError::InvalidSlippage(self.max_slippage));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if self.instrument_classes.is_empty() {
            return Err(ConfigError::NoInstrumentClasses);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn order_delay(&self) -> Duration {
        Duration::from_millis(self.order_delay_ms)
    }
}

/// Return the key only when it is set to something other than the placeholder.
pub fn usable_private_key(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim)
        .filter(|k| !k.is_empty() && *k != PLACEHOLDER_PRIVATE_KEY)
}
