//! Execution port: one interface over the live venue and the in-memory dry-run ledger.
//!
//! The adapter is selected once at startup (see [`ExecutionIdentity`]); the
//! reconcilers only ever see `dyn Venue`.

mod live;
pub mod normalize;
mod simulated;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{ConfigError, VenueResult};
use crate::models::{AccountState, Fill, InstrumentClass, InstrumentRegistry};
use crate::trading::usable_private_key;

pub use live::LiveVenue;
pub use simulated::SimulatedVenue;

/// Reference to one resting order to cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub instrument: String,
    pub order_id: u64,
}

/// Successful outcome of a placement.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderAck {
    /// Order rests on the book.
    Resting { order_id: u64 },
    /// Order executed immediately.
    Filled {
        order_id: u64,
        filled_size: Decimal,
        avg_price: Decimal,
    },
}

impl OrderAck {
    pub fn order_id(&self) -> u64 {
        match self {
            OrderAck::Resting { order_id } | OrderAck::Filled { order_id, .. } => *order_id,
        }
    }
}

/// Contract shared by the live and simulated adapters.
///
/// Fetch failures must be surfaced as errors, never as an empty state: an
/// empty target snapshot would look like "close everything".
#[async_trait]
pub trait Venue: Send + Sync {
    /// Short adapter name for logs ("live", "simulated").
    fn name(&self) -> &str;

    /// Address of the controlled account.
    fn account_address(&self) -> &str;

    /// Instrument metadata (asset ids, size precision).
    fn instruments(&self) -> &InstrumentRegistry;

    /// Positions of the requested classes plus all open orders of an address.
    async fn fetch_state(
        &self,
        address: &str,
        classes: &[InstrumentClass],
    ) -> VenueResult<AccountState>;

    /// Mid price of every listed instrument.
    async fn all_mids(&self) -> VenueResult<HashMap<String, Decimal>>;

    /// Recent fills of an address, newest first.
    async fn recent_fills(&self, address: &str) -> VenueResult<Vec<Fill>>;

    /// Place a good-til-cancelled limit order.
    async fn place_limit_order(
        &self,
        instrument: &str,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
    ) -> VenueResult<OrderAck>;

    /// Cancel a batch of resting orders in one call.
    async fn cancel_orders(&self, cancels: &[CancelRequest]) -> VenueResult<()>;

    /// Immediately move a position by `size` with bounded slippage around `reference_price`.
    async fn market_adjust(
        &self,
        instrument: &str,
        is_buy: bool,
        size: Decimal,
        reference_price: Decimal,
        max_slippage: Decimal,
    ) -> VenueResult<OrderAck>;
}

/// How this process is allowed to act on the venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionIdentity {
    /// Sign and submit real orders with this key.
    Live { private_key: String },
    /// Simulate execution for this address.
    DryRun { address: String },
}

impl ExecutionIdentity {
    /// Pick the identity once at startup. A key left at its placeholder counts as absent.
    pub fn select(
        private_key: Option<&str>,
        dry_run_address: Option<&str>,
    ) -> Result<Self, ConfigError> {
        if let Some(key) = usable_private_key(private_key) {
            return Ok(Self::Live {
                private_key: key.to_string(),
            });
        }

        match dry_run_address.map(str::trim).filter(|a| !a.is_empty()) {
            Some(address) => Ok(Self::DryRun {
                address: address.to_string(),
            }),
            None => Err(ConfigError::NoSigningIdentity),
        }
    }
}
