//! Unified account-state models shared by both venue adapters and the reconcilers.

mod account;
mod fill;
mod instrument;

pub use account::{AccountState, InstrumentClass, Order, Position, Side};
pub use fill::Fill;
pub use instrument::{InstrumentRegistry, InstrumentSpec, SPOT_ASSET_OFFSET};
