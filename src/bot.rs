//! Poll loop: fetch both snapshots, record target history, then run the
//! position and order reconcilers in sequence.
//!
//! A failed fetch skips the rest of the tick. Nothing inside a tick is
//! allowed to end the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::VenueError;
use crate::history::HistoryTracker;
use crate::models::AccountState;
use crate::trading::{
    CopyConfig, OrderReconciler, OrderSyncReport, PositionReconciler, PositionSyncReport,
    SkipReason, SyncController, SyncDecision,
};
use crate::venue::Venue;

/// Step of the tick state machine.
///
/// `FetchTarget -> FetchSelf -> Reconcile -> Idle`, with a failed fetch
/// jumping straight to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    FetchTarget,
    FetchSelf,
    Reconcile,
    Idle,
}

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// A snapshot could not be fetched; nothing was reconciled.
    Skipped { at: PollState, error: VenueError },
    /// Incremental mode baseline taken; orders were still synced.
    BaselineCaptured { orders: OrderSyncReport },
    Reconciled {
        positions: PositionSyncReport,
        orders: OrderSyncReport,
    },
}

/// Drives one (target, controller) pair.
pub struct Copier {
    config: CopyConfig,
    venue: Arc<dyn Venue>,
    sync: SyncController,
    positions: PositionReconciler,
    orders: OrderReconciler,
    history: HistoryTracker,
    state: PollState,
    shutdown: Arc<AtomicBool>,
}

impl Copier {
    pub fn new(config: CopyConfig, venue: Arc<dyn Venue>, history: HistoryTracker) -> Self {
        Self {
            sync: SyncController::new(config.sync_mode, config.copy_ratio),
            positions: PositionReconciler::from_config(&config),
            orders: OrderReconciler::from_config(&config),
            config,
            venue,
            history,
            state: PollState::Idle,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn sync_controller(&self) -> &SyncController {
        &self.sync
    }

    /// Main run loop. Returns once a shutdown was requested.
    ///
    /// The full poll interval is slept after every tick, however long the
    /// tick itself took.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            venue = self.venue.name(),
            target = %self.config.target_address,
            me = %self.venue.account_address(),
            ratio = %self.config.copy_ratio,
            mode = %self.config.sync_mode,
            poll_interval = self.config.poll_interval_secs,
            "Starting copier"
        );

        let poll_interval = self.config.poll_interval();

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.tick().await {
                TickOutcome::Skipped { at, error } => {
                    debug!(state = ?at, error = %error, "Tick skipped");
                }
                TickOutcome::BaselineCaptured { orders } => {
                    debug!(placed = orders.placed, "Baseline tick complete");
                }
                TickOutcome::Reconciled { positions, orders } => {
                    debug!(
                        adjusted = positions.adjusted.len(),
                        failed = positions.failed.len(),
                        no_price = positions.skipped_for(SkipReason::NoPrice),
                        book_changed = orders.changed,
                        placed = orders.placed,
                        cancelled = orders.cancelled,
                        cancel_failed = orders.cancel_failed,
                        rejected = orders.failed,
                        margin_halt = orders.halted_on_margin,
                        "Tick complete"
                    );
                }
            }

            debug!(state = ?self.state, sleep_secs = poll_interval.as_secs(), "Waiting for next tick");
            sleep(poll_interval).await;
        }

        info!("Copier stopped");
        Ok(())
    }

    /// Single iteration of the poll loop.
    pub async fn tick(&mut self) -> TickOutcome {
        let outcome = self.run_steps().await;
        self.state = PollState::Idle;
        outcome
    }

    async fn run_steps(&mut self) -> TickOutcome {
        let target_address = self.config.target_address.clone();

        self.state = PollState::FetchTarget;
        let target = match self.fetch(&target_address, PollState::FetchTarget).await {
            Ok(state) => state,
            Err(skipped) => return skipped,
        };

        self.record_history(&target_address, &target).await;

        self.state = PollState::FetchSelf;
        let me = self.venue.account_address().to_string();
        let mine = match self.fetch(&me, PollState::FetchSelf).await {
            Ok(state) => state,
            Err(skipped) => return skipped,
        };

        self.state = PollState::Reconcile;
        let decision = self.sync.observe(&target, &mine);
        let venue = self.venue.as_ref();

        match decision {
            SyncDecision::BaselineCaptured => {
                let orders = self.orders.reconcile(&target, &mine, venue).await;
                TickOutcome::BaselineCaptured { orders }
            }
            SyncDecision::Reconcile => {
                let positions = self
                    .positions
                    .reconcile(&target, &mine, &self.sync, venue)
                    .await;
                let orders = self.orders.reconcile(&target, &mine, venue).await;
                TickOutcome::Reconciled { positions, orders }
            }
        }
    }

    async fn fetch(&self, address: &str, at: PollState) -> Result<AccountState, TickOutcome> {
        let classes = &self.config.instrument_classes;
        self.venue
            .fetch_state(address, classes)
            .await
            .map_err(|error| {
                warn!(address = %address, state = ?at, error = %error, "Snapshot fetch failed");
                TickOutcome::Skipped { at, error }
            })
    }

    async fn record_history(&mut self, address: &str, target: &AccountState) {
        let fills = match self.venue.recent_fills(address).await {
            Ok(fills) => Some(fills),
            Err(e) => {
                warn!(error = %e, "Failed to fetch target fills");
                None
            }
        };
        let report = self.history.record(target, fills.as_deref()).await;
        if report.errors > 0 {
            warn!(errors = report.errors, "History recording incomplete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::TracingRecorder;
    use crate::models::{InstrumentClass, InstrumentRegistry, Order, Position, Side};
    use crate::trading::SyncMode;
    use crate::venue::testing::{Call, RecordingVenue};
    use crate::venue::SimulatedVenue;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const TARGET: &str = "0xtarget";
    const ME: &str = "0xme";

    fn make_config(mode: SyncMode) -> CopyConfig {
        CopyConfig {
            target_address: TARGET.to_string(),
            copy_ratio: dec!(0.1),
            sync_mode: mode,
            order_delay_ms: 0,
            ..CopyConfig::default()
        }
    }

    fn make_copier(config: CopyConfig, venue: Arc<dyn Venue>) -> Copier {
        let history = HistoryTracker::new(TARGET, Box::new(TracingRecorder));
        Copier::new(config, venue, history)
    }

    fn make_target(size: Decimal) -> AccountState {
        let mut state = AccountState::new();
        state.insert_position(
            Position::new("ETH", InstrumentClass::Perp, size).with_entry(dec!(2000), 5),
        );
        state.open_orders.push(Order {
            instrument: "ETH".to_string(),
            class: InstrumentClass::Perp,
            side: Side::Buy,
            limit_price: dec!(1900),
            size: dec!(5),
            order_id: 11,
            placed_at_ms: 0,
        });
        state
    }

    fn make_venue(target: AccountState) -> RecordingVenue {
        let mut venue = RecordingVenue::new(ME);
        venue.states.insert(TARGET.to_string(), target);
        venue.mids.insert("ETH".to_string(), dec!(2000));
        venue
    }

    #[tokio::test]
    async fn test_target_fetch_failure_skips_tick() {
        let mut venue = make_venue(make_target(dec!(10)));
        venue.failing_fetch.insert(TARGET.to_string());
        let venue = Arc::new(venue);
        let mut copier = make_copier(make_config(SyncMode::Absolute), venue.clone());

        let outcome = copier.tick().await;

        assert!(matches!(
            outcome,
            TickOutcome::Skipped {
                at: PollState::FetchTarget,
                error: VenueError::Transport(_)
            }
        ));
        assert!(venue.calls().is_empty());
        assert_eq!(copier.state, PollState::Idle);
    }

    #[tokio::test]
    async fn test_self_fetch_failure_never_reconciles() {
        let mut venue = make_venue(make_target(dec!(10)));
        venue.failing_fetch.insert(ME.to_string());
        let venue = Arc::new(venue);
        let mut copier = make_copier(make_config(SyncMode::Absolute), venue.clone());

        let outcome = copier.tick().await;

        assert!(matches!(
            outcome,
            TickOutcome::Skipped {
                at: PollState::FetchSelf,
                ..
            }
        ));
        assert!(venue.calls().is_empty());
        // Incremental baseline must not be captured from a partial tick
        assert!(copier.sync_controller().baseline().is_none());
    }

    #[tokio::test]
    async fn test_absolute_tick_mirrors_positions_and_orders() {
        let venue = Arc::new(make_venue(make_target(dec!(10))));
        let mut copier = make_copier(make_config(SyncMode::Absolute), venue.clone());

        let outcome = copier.tick().await;

        let TickOutcome::Reconciled { positions, orders } = outcome else {
            panic!("expected a reconciled tick");
        };
        assert_eq!(positions.adjusted, vec!["ETH".to_string()]);
        assert_eq!(orders.placed, 1);
        assert_eq!(copier.state, PollState::Idle);
        assert_eq!(
            venue.calls(),
            vec![
                Call::Market {
                    instrument: "ETH".to_string(),
                    is_buy: true,
                    size: dec!(1),
                    reference_price: dec!(2000),
                },
                Call::Place {
                    instrument: "ETH".to_string(),
                    is_buy: true,
                    size: dec!(0.5),
                    price: dec!(1900),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_fill_fetch_failure_does_not_block_reconcile() {
        let mut venue = make_venue(make_target(dec!(10)));
        venue.failing_fills = true;
        let venue = Arc::new(venue);
        let mut copier = make_copier(make_config(SyncMode::Absolute), venue.clone());

        assert!(matches!(
            copier.tick().await,
            TickOutcome::Reconciled { .. }
        ));
    }

    #[tokio::test]
    async fn test_incremental_first_tick_only_captures_baseline() {
        let venue = Arc::new(make_venue(make_target(dec!(10))));
        let mut copier = make_copier(make_config(SyncMode::Incremental), venue.clone());

        let outcome = copier.tick().await;

        let TickOutcome::BaselineCaptured { orders } = outcome else {
            panic!("expected baseline capture");
        };
        assert_eq!(orders.placed, 1);
        assert!(!venue
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Market { .. })));

        // Unchanged target: nothing to adjust, order book unchanged
        venue.clear_calls();
        let outcome = copier.tick().await;
        assert!(matches!(outcome, TickOutcome::Reconciled { .. }));
        assert!(venue.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_converges_on_simulated_ledger() {
        let registry = InstrumentRegistry::new();
        let venue = Arc::new(SimulatedVenue::new(ME, registry));
        venue.seed_account(TARGET, make_target(dec!(-20))).await;
        venue.set_mid("ETH", dec!(2000)).await;
        let mut copier = make_copier(make_config(SyncMode::Absolute), venue.clone());

        copier.tick().await;
        let mine = venue.account(ME).await.unwrap();
        assert_eq!(mine.size_of("ETH"), dec!(-2));
        assert_eq!(mine.open_orders.len(), 1);
        assert_eq!(mine.open_orders[0].size, dec!(0.5));

        // Second tick: converged, nothing else changes
        copier.tick().await;
        let again = venue.account(ME).await.unwrap();
        assert_eq!(again.size_of("ETH"), dec!(-2));
        assert_eq!(again.open_orders.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_still_sleeps_full_interval() {
        let mut venue = make_venue(make_target(dec!(10)));
        venue
            .fetch_delay
            .insert(TARGET.to_string(), Duration::from_secs(12));
        let venue = Arc::new(venue);
        let mut config = make_config(SyncMode::Absolute);
        config.poll_interval_secs = 5;
        let mut copier = make_copier(config, venue.clone());
        let shutdown = copier.shutdown_signal();

        let handle = tokio::spawn(async move { copier.run().await });

        // Each tick is 12s of fetching plus 5s idle; stop during the fourth idle period
        tokio::time::sleep(Duration::from_secs(65)).await;
        shutdown.store(true, Ordering::SeqCst);
        handle.await.unwrap().unwrap();

        let starts = venue.fetch_starts(TARGET);
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(17), "ticks only {:?} apart", gap);
        }
    }
}
