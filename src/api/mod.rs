//! Hyperliquid API clients for account data and signed order execution.

mod exchange_client;
mod info_client;
mod types;

pub use exchange_client::{CancelWire, ExchangeClient, OrderWire, Tif};
pub use info_client::{is_mainnet_url, InfoClient, MAINNET_API_URL};
pub use types::*;
