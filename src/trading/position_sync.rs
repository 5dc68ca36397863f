//! Position reconciler: per-instrument market adjustments toward the scaled target.

use std::collections::{BTreeSet, HashMap};

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::models::{AccountState, InstrumentRegistry, Side};
use crate::venue::Venue;

use super::config::CopyConfig;
use super::sizing::round_sz;
use super::sync_mode::SyncController;

/// A market adjustment the reconciler decided to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionAdjustment {
    pub is_buy: bool,
    /// Floored absolute size to trade
    pub size: Decimal,
    pub reference_price: Decimal,
    /// Notional of the unrounded difference at the reference price
    pub diff_usd: Decimal,
}

/// Why an instrument was left alone this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// |diff| below the dust threshold
    Dust,
    /// No usable mid price
    NoPrice,
    /// Notional of the difference not above the USD threshold
    BelowThreshold,
    /// Size floors to zero at the instrument's precision
    ZeroSize,
}

/// Outcome of one position pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionSyncReport {
    pub adjusted: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl PositionSyncReport {
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|(_, r)| *r == reason).count()
    }
}

/// Computes per-instrument deltas and submits market adjustments.
#[derive(Debug, Clone)]
pub struct PositionReconciler {
    max_slippage: Decimal,
    usd_threshold: Decimal,
    dust_threshold: Decimal,
}

impl PositionReconciler {
    pub fn new(max_slippage: Decimal, usd_threshold: Decimal, dust_threshold: Decimal) -> Self {
        Self {
            max_slippage,
            usd_threshold,
            dust_threshold,
        }
    }

    pub fn from_config(config: &CopyConfig) -> Self {
        Self::new(
            config.max_slippage,
            config.usd_threshold,
            config.dust_threshold,
        )
    }

    /// Decide what (if anything) to trade for one instrument.
    pub fn plan(
        &self,
        instrument: &str,
        diff: Decimal,
        mid: Option<Decimal>,
        registry: &InstrumentRegistry,
    ) -> Result<PositionAdjustment, SkipReason> {
        if diff.abs() < self.dust_threshold {
            return Err(SkipReason::Dust);
        }

        let mid = match mid {
            Some(px) if px > Decimal::ZERO => px,
            _ => return Err(SkipReason::NoPrice),
        };

        let diff_usd = diff.abs() * mid;
        if diff_usd <= self.usd_threshold {
            return Err(SkipReason::BelowThreshold);
        }

        let size = round_sz(diff.abs(), registry.sz_decimals(instrument));
        if size.is_zero() {
            return Err(SkipReason::ZeroSize);
        }

        Ok(PositionAdjustment {
            is_buy: diff > Decimal::ZERO,
            size,
            reference_price: mid,
            diff_usd,
        })
    }

    /// Run one pass over every instrument held by either account.
    ///
    /// Errors never escape: a failed submission is logged and the next
    /// instrument is processed.
    pub async fn reconcile(
        &self,
        target: &AccountState,
        mine: &AccountState,
        sync: &SyncController,
        venue: &dyn Venue,
    ) -> PositionSyncReport {
        let mut report = PositionSyncReport::default();

        let instruments: BTreeSet<&String> = target
            .positions
            .keys()
            .chain(mine.positions.keys())
            .collect();

        let mut deviations = Vec::new();
        for instrument in instruments {
            let target_size = target.size_of(instrument);
            let my_size = mine.size_of(instrument);
            let goal = sync.target_goal(instrument, target_size);
            let diff = goal - my_size;

            if diff.abs() < self.dust_threshold {
                report.skipped.push((instrument.clone(), SkipReason::Dust));
                continue;
            }

            warn!(
                coin = %instrument,
                target = %target_size,
                mine = %my_size,
                goal = %goal,
                diff = %diff,
                "Position deviation"
            );
            deviations.push((instrument.clone(), diff));
        }

        if deviations.is_empty() {
            return report;
        }

        let mids: HashMap<String, Decimal> = match venue.all_mids().await {
            Ok(mids) => mids,
            Err(e) => {
                warn!(error = %e, "Mid prices unavailable; skipping position adjustments");
                report.skipped.extend(
                    deviations
                        .into_iter()
                        .map(|(instrument, _)| (instrument, SkipReason::NoPrice)),
                );
                return report;
            }
        };

        for (instrument, diff) in deviations {
            let adjustment = match self.plan(
                &instrument,
                diff,
                mids.get(&instrument).copied(),
                venue.instruments(),
            ) {
                Ok(adjustment) => adjustment,
                Err(reason) => {
                    debug!(coin = %instrument, diff = %diff, reason = ?reason, "Skipping adjustment");
                    report.skipped.push((instrument, reason));
                    continue;
                }
            };

            info!(
                coin = %instrument,
                side = %Side::from_is_buy(adjustment.is_buy),
                size = %adjustment.size,
                price = %adjustment.reference_price,
                usd = %adjustment.diff_usd.round_dp(2),
                "Submitting market adjustment"
            );

            match venue
                .market_adjust(
                    &instrument,
                    adjustment.is_buy,
                    adjustment.size,
                    adjustment.reference_price,
                    self.max_slippage,
                )
                .await
            {
                Ok(ack) => {
                    info!(coin = %instrument, order_id = ack.order_id(), "Market adjustment accepted");
                    report.adjusted.push(instrument);
                }
                Err(e) => {
                    error!(coin = %instrument, error = %e, "Market adjustment failed");
                    report.failed.push(instrument);
                }
            }
        }

        report
    }
}
