//! History recording of the target account: newly seen orders, changed
//! positions and newly seen fills.
//!
//! Recording is best effort. Failures are logged and never reach the
//! reconcilers.

mod store;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{AccountState, Fill, Order, Position};

pub use store::{HistoryTable, SqliteRecorder};

/// Sink for history events.
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    async fn log_order(&self, address: &str, order: &Order) -> Result<()>;
    async fn log_position(&self, address: &str, position: &Position) -> Result<()>;
    async fn log_trade(&self, address: &str, fill: &Fill) -> Result<()>;
}

/// Recorder that writes structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

#[async_trait]
impl HistoryRecorder for TracingRecorder {
    async fn log_order(&self, address: &str, order: &Order) -> Result<()> {
        info!(
            address = %address,
            coin = %order.instrument,
            side = %order.side,
            price = %order.limit_price,
            size = %order.size,
            oid = order.order_id,
            "History: new order"
        );
        Ok(())
    }

    async fn log_position(&self, address: &str, position: &Position) -> Result<()> {
        info!(
            address = %address,
            coin = %position.instrument,
            size = %position.signed_size,
            entry = %position.entry_price,
            leverage = position.leverage,
            "History: position changed"
        );
        Ok(())
    }

    async fn log_trade(&self, address: &str, fill: &Fill) -> Result<()> {
        info!(
            address = %address,
            coin = %fill.instrument,
            side = %fill.side,
            price = %fill.price,
            size = %fill.size,
            key = %fill.dedup_key(),
            "History: new fill"
        );
        Ok(())
    }
}

/// Previously observed order ids and fill keys.
#[derive(Debug, Default, Clone)]
pub struct SeenSets {
    pub order_ids: HashSet<u64>,
    pub fill_keys: HashSet<String>,
}

/// Counts of what one pass recorded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HistoryReport {
    pub orders: usize,
    pub positions: usize,
    pub trades: usize,
    pub errors: usize,
}

/// Tracks what has already been recorded for one address.
pub struct HistoryTracker {
    address: String,
    recorder: Box<dyn HistoryRecorder>,
    seen: SeenSets,
    last_positions: HashMap<String, Position>,
}

impl HistoryTracker {
    pub fn new(address: impl Into<String>, recorder: Box<dyn HistoryRecorder>) -> Self {
        Self {
            address: address.into(),
            recorder,
            seen: SeenSets::default(),
            last_positions: HashMap::new(),
        }
    }

    pub fn seen(&self) -> &SeenSets {
        &self.seen
    }

    /// Record everything new in this snapshot. State only advances for
    /// entries the recorder accepted, so failed ones are retried next tick.
    pub async fn record(&mut self, state: &AccountState, fills: Option<&[Fill]>) -> HistoryReport {
        let mut report = HistoryReport::default();

        for order in &state.open_orders {
            if self.seen.order_ids.contains(&order.order_id) {
                continue;
            }
            match self.recorder.log_order(&self.address, order).await {
                Ok(()) => {
                    self.seen.order_ids.insert(order.order_id);
                    report.orders += 1;
                }
                Err(e) => {
                    warn!(oid = order.order_id, error = %e, "Failed to record order");
                    report.errors += 1;
                }
            }
        }

        for position in state.positions.values() {
            let changed = match self.last_positions.get(&position.instrument) {
                None => true,
                Some(prev) => {
                    prev.signed_size != position.signed_size
                        || prev.entry_price != position.entry_price
                }
            };
            if !changed {
                continue;
            }
            match self.recorder.log_position(&self.address, position).await {
                Ok(()) => {
                    self.last_positions
                        .insert(position.instrument.clone(), position.clone());
                    report.positions += 1;
                }
                Err(e) => {
                    warn!(coin = %position.instrument, error = %e, "Failed to record position");
                    report.errors += 1;
                }
            }
        }

        for fill in fills.unwrap_or_default() {
            let key = fill.dedup_key();
            if self.seen.fill_keys.contains(&key) {
                continue;
            }
            match self.recorder.log_trade(&self.address, fill).await {
                Ok(()) => {
                    self.seen.fill_keys.insert(key);
                    report.trades += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to record fill");
                    report.errors += 1;
                }
            }
        }

        report
    }
}
