//! In-memory ledger used for dry runs.
//!
//! Mirrors the live contract: market adjustments fill immediately at the
//! reference price, limit orders rest with an incrementing id, cancels remove
//! by id. Reads for addresses the ledger does not own are forwarded to an
//! optional upstream venue (the real market in dry-run mode).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{VenueError, VenueResult};
use crate::models::{AccountState, Fill, InstrumentClass, InstrumentRegistry, Order, Position, Side};

use super::{CancelRequest, OrderAck, Venue};

#[derive(Debug, Default)]
struct Ledger {
    accounts: HashMap<String, AccountState>,
    fills: HashMap<String, Vec<Fill>>,
    mids: HashMap<String, Decimal>,
    next_order_id: u64,
    next_trade_id: u64,
    /// Logical clock, advanced once per mutation
    clock_ms: i64,
    /// Maximum resting notional before placements are refused
    margin_budget: Option<Decimal>,
}

impl Ledger {
    fn tick(&mut self) -> i64 {
        self.clock_ms += 1;
        self.clock_ms
    }

    fn allocate_order_id(&mut self) -> u64 {
        self.next_order_id += 1;
        self.next_order_id
    }
}

/// Dry-run venue backed by an in-process ledger.
pub struct SimulatedVenue {
    address: String,
    registry: InstrumentRegistry,
    ledger: Mutex<Ledger>,
    upstream: Option<Arc<dyn Venue>>,
}

impl SimulatedVenue {
    /// Create a ledger owning an empty account for `address`.
    pub fn new(address: impl Into<String>, registry: InstrumentRegistry) -> Self {
        let address = address.into();
        let mut ledger = Ledger::default();
        ledger.accounts.insert(address.clone(), AccountState::new());

        Self {
            address,
            registry,
            ledger: Mutex::new(ledger),
            upstream: None,
        }
    }

    /// Forward reads for other addresses (and mids) to a real venue.
    pub fn with_upstream(mut self, upstream: Arc<dyn Venue>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Refuse placements once resting notional would exceed `budget`.
    pub fn with_margin_budget(mut self, budget: Decimal) -> Self {
        self.ledger.get_mut().margin_budget = Some(budget);
        self
    }

    /// Install (or replace) the state of any address.
    #[cfg(test)]
    pub async fn seed_account(&self, address: &str, state: AccountState) {
        self.ledger
            .lock()
            .await
            .accounts
            .insert(address.to_string(), state);
    }

    #[cfg(test)]
    pub async fn set_mid(&self, instrument: &str, price: Decimal) {
        self.ledger
            .lock()
            .await
            .mids
            .insert(instrument.to_string(), price);
    }

    /// Snapshot of an address as stored in the ledger.
    #[cfg(test)]
    pub async fn account(&self, address: &str) -> Option<AccountState> {
        self.ledger.lock().await.accounts.get(address).cloned()
    }

    fn upstream(&self, what: &str) -> VenueResult<&Arc<dyn Venue>> {
        self.upstream.as_ref().ok_or_else(|| {
            VenueError::Transport(format!("simulated venue has no upstream for {}", what))
        })
    }

    fn check_order(&self, instrument: &str, size: Decimal, price: Decimal) -> VenueResult<()> {
        if size <= Decimal::ZERO {
            return Err(VenueError::rejected(format!(
                "Order has zero size. asset={}",
                instrument
            )));
        }
        if price <= Decimal::ZERO {
            return Err(VenueError::rejected(format!(
                "Order has invalid price. asset={}",
                instrument
            )));
        }
        Ok(())
    }
}

/// Apply a signed fill to a position, keeping a weighted entry price while
/// the position grows and the original entry while it shrinks.
fn apply_fill(
    existing: Option<&Position>,
    fill: Decimal,
    price: Decimal,
    class: InstrumentClass,
    instrument: &str,
) -> Position {
    let Some(current) = existing else {
        return Position::new(instrument, class, fill).with_entry(price, 1);
    };

    let old = current.signed_size;
    let new = old + fill;
    let same_direction = old.is_sign_negative() == fill.is_sign_negative();

    let entry = if new.is_zero() {
        Decimal::ZERO
    } else if same_direction {
        (old.abs() * current.entry_price + fill.abs() * price) / new.abs()
    } else if new.is_sign_negative() != old.is_sign_negative() {
        // Flipped through zero
        price
    } else {
        current.entry_price
    };

    Position {
        signed_size: new,
        entry_price: entry,
        ..current.clone()
    }
}

#[async_trait]
impl Venue for SimulatedVenue {
    fn name(&self) -> &str {
        "simulated"
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
        let local = self.ledger.lock().await.accounts.get(address).cloned();
        match local {
            Some(mut state) => {
                state.retain_classes(classes);
                Ok(state)
            }
            None => self.upstream("account reads")?.fetch_state(address, classes).await,
        }
    }

    async fn all_mids(&self) -> VenueResult<HashMap<String, Decimal>> {
        let mut mids = match &self.upstream {
            Some(upstream) => upstream.all_mids().await?,
            None => HashMap::new(),
        };
        // Locally set mids take precedence
        mids.extend(self.ledger.lock().await.mids.clone());
        Ok(mids)
    }

    async fn recent_fills(&self, address: &str) -> VenueResult<Vec<Fill>> {
        {
            let ledger = self.ledger.lock().await;
            if ledger.accounts.contains_key(address) {
                let mut fills = ledger.fills.get(address).cloned().unwrap_or_default();
                fills.reverse();
                return Ok(fills);
            }
        }
        self.upstream("fill reads")?.recent_fills(address).await
    }

    async fn place_limit_order(
        &self,
        instrument: &str,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
    ) -> VenueResult<OrderAck> {
        self.check_order(instrument, size, price)?;

        let mut ledger = self.ledger.lock().await;
        let resting: Decimal = ledger
            .accounts
            .get(&self.address)
            .map(|a| a.open_orders.iter().map(Order::notional).sum())
            .unwrap_or(Decimal::ZERO);

        if let Some(budget) = ledger.margin_budget {
            if resting + size * price > budget {
                return Err(VenueError::rejected(format!(
                    "Insufficient margin to place order. asset={}",
                    instrument
                )));
            }
        }

        let order_id = ledger.allocate_order_id();
        let placed_at_ms = ledger.tick();
        let order = Order {
            instrument: instrument.to_string(),
            class: self.registry.class_of(instrument),
            side: Side::from_is_buy(is_buy),
            limit_price: price,
            size,
            order_id,
            placed_at_ms,
        };

        ledger
            .accounts
            .entry(self.address.clone())
            .or_default()
            .open_orders
            .push(order);

        debug!(instrument = %instrument, order_id, %size, %price, "Simulated limit order resting");
        Ok(OrderAck::Resting { order_id })
    }

    async fn cancel_orders(&self, cancels: &[CancelRequest]) -> VenueResult<()> {
        let mut ledger = self.ledger.lock().await;
        let account = ledger.accounts.entry(self.address.clone()).or_default();

        let mut missing = Vec::new();
        for cancel in cancels {
            let before = account.open_orders.len();
            account.open_orders.retain(|o| o.order_id != cancel.order_id);
            if account.open_orders.len() == before {
                missing.push(cancel.order_id);
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(VenueError::rejected(format!(
                "Order was never placed, already canceled, or filled. oids={:?}",
                missing
            )))
        }
    }

    async fn market_adjust(
        &self,
        instrument: &str,
        is_buy: bool,
        size: Decimal,
        reference_price: Decimal,
        _max_slippage: Decimal,
    ) -> VenueResult<OrderAck> {
        self.check_order(instrument, size, reference_price)?;

        let signed = if is_buy { size } else { -size };
        let class = self.registry.class_of(instrument);

        let mut ledger = self.ledger.lock().await;
        let order_id = ledger.allocate_order_id();
        ledger.next_trade_id += 1;
        let trade_id = ledger.next_trade_id;
        let time_ms = ledger.tick();

        let account = ledger.accounts.entry(self.address.clone()).or_default();
        let updated = apply_fill(
            account.positions.get(instrument),
            signed,
            reference_price,
            class,
            instrument,
        );
        account.insert_position(updated);

        ledger
            .fills
            .entry(self.address.clone())
            .or_default()
            .push(Fill {
                instrument: instrument.to_string(),
                side: Side::from_is_buy(is_buy),
                price: reference_price,
                size,
                time_ms,
                hash: Some(format!("0xsim{:016x}", trade_id)),
                trade_id: Some(trade_id),
                closed_pnl: Decimal::ZERO,
                fee: Decimal::ZERO,
            });

        info!(instrument = %instrument, side = %Side::from_is_buy(is_buy), %size, price = %reference_price, "Simulated fill");
        Ok(OrderAck::Filled {
            order_id,
            filled_size: size,
            avg_price: reference_price,
        })
    }
}
