//! Scripted venue that records every call, for reconciler tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::error::{VenueError, VenueResult};
use crate::models::{AccountState, Fill, InstrumentClass, InstrumentRegistry};

use super::{CancelRequest, OrderAck, Venue};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Place {
        instrument: String,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
    },
    Cancel(Vec<u64>),
    Market {
        instrument: String,
        is_buy: bool,
        size: Decimal,
        reference_price: Decimal,
    },
}

#[derive(Default)]
pub struct RecordingVenue {
    pub address: String,
    pub registry: InstrumentRegistry,
    pub states: HashMap<String, AccountState>,
    pub fills: HashMap<String, Vec<Fill>>,
    pub mids: HashMap<String, Decimal>,
    /// Addresses whose fetch fails with a transport error
    pub failing_fetch: HashSet<String>,
    /// Addresses whose fetch takes this long to answer
    pub fetch_delay: HashMap<String, Duration>,
    /// Start time of every fetch, by address
    pub fetched_at: Mutex<Vec<(String, Instant)>>,
    pub failing_mids: bool,
    pub failing_fills: bool,
    pub failing_cancel: bool,
    /// Placement index (0-based) -> rejection message
    pub reject_place_at: HashMap<usize, String>,
    /// Instruments whose market adjustment fails
    pub failing_market: HashSet<String>,
    pub calls: Mutex<Vec<Call>>,
}

impl RecordingVenue {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn placements(&self) -> Vec<(String, bool, Decimal, Decimal)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Place {
                    instrument,
                    is_buy,
                    size,
                    price,
                } => Some((instrument, is_buy, size, price)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fetch_starts(&self, address: &str) -> Vec<Instant> {
        self.fetched_at
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, at)| *at)
            .collect()
    }

    fn record(&self, call: Call) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call);
        calls.len()
    }
}

#[async_trait]
impl Venue for RecordingVenue {
    fn name(&self) -> &str {
        "recording"
    }

    fn account_address(&self) -> &str {
        &self.address
    }

    fn instruments(&self) -> &InstrumentRegistry {
        &self.registry
    }

    async fn fetch_state(
        &self,
        address: &str,
        classes: &[InstrumentClass],
    ) -> VenueResult<AccountState> {
        self.fetched_at
            .lock()
            .unwrap()
            .push((address.to_string(), Instant::now()));
        if let Some(delay) = self.fetch_delay.get(address) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_fetch.contains(address) {
            return Err(VenueError::Transport("connection refused".to_string()));
        }
        let mut state = self.states.get(address).cloned().unwrap_or_default();
        state.retain_classes(classes);
        Ok(state)
    }

    async fn all_mids(&self) -> VenueResult<HashMap<String, Decimal>> {
        if self.failing_mids {
            return Err(VenueError::Transport("mids unavailable".to_string()));
        }
        Ok(self.mids.clone())
    }

    async fn recent_fills(&self, address: &str) -> VenueResult<Vec<Fill>> {
        if self.failing_fills {
            return Err(VenueError::Transport("fills unavailable".to_string()));
        }
        Ok(self.fills.get(address).cloned().unwrap_or_default())
    }

    async fn place_limit_order(
        &self,
        instrument: &str,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
    ) -> VenueResult<OrderAck> {
        let index = self
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Place { .. }))
            .count();
        let seq = self.record(Call::Place {
            instrument: instrument.to_string(),
            is_buy,
            size,
            price,
        });
        match self.reject_place_at.get(&index) {
            Some(message) => Err(VenueError::rejected(message.clone())),
            None => Ok(OrderAck::Resting {
                order_id: seq as u64,
            }),
        }
    }

    async fn cancel_orders(&self, cancels: &[CancelRequest]) -> VenueResult<()> {
        self.record(Call::Cancel(cancels.iter().map(|c| c.order_id).collect()));
        if self.failing_cancel {
            return Err(VenueError::rejected("Order was never placed"));
        }
        Ok(())
    }

    async fn market_adjust(
        &self,
        instrument: &str,
        is_buy: bool,
        size: Decimal,
        reference_price: Decimal,
        _max_slippage: Decimal,
    ) -> VenueResult<OrderAck> {
        let seq = self.record(Call::Market {
            instrument: instrument.to_string(),
            is_buy,
            size,
            reference_price,
        });
        if self.failing_market.contains(instrument) {
            return Err(VenueError::Transport("timeout".to_string()));
        }
        Ok(OrderAck::Filled {
            order_id: seq as u64,
            filled_size: size,
            avg_price: reference_price,
        })
    }
}
