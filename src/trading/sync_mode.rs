//! Sync-mode controller: absolute vs. baseline-relative position goals.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::info;

use crate::models::AccountState;

use super::config::SyncMode;

/// Position sizes of both accounts captured on the first successful tick in
/// incremental mode. Never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub target_positions: BTreeMap<String, Decimal>,
    pub my_positions: BTreeMap<String, Decimal>,
}

impl Baseline {
    pub fn capture(target: &AccountState, mine: &AccountState) -> Self {
        Self {
            target_positions: target.position_sizes(),
            my_positions: mine.position_sizes(),
        }
    }

    fn target(&self, instrument: &str) -> Decimal {
        self.target_positions
            .get(instrument)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn mine(&self, instrument: &str) -> Decimal {
        self.my_positions
            .get(instrument)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// What the position reconciler should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Baseline was just captured; no position adjustment this tick.
    BaselineCaptured,
    /// Reconcile positions against the goals.
    Reconcile,
}

/// Owns the sync mode and, in incremental mode, the one-time baseline.
#[derive(Debug, Clone)]
pub struct SyncController {
    mode: SyncMode,
    copy_ratio: Decimal,
    baseline: Option<Baseline>,
}

impl SyncController {
    pub fn new(mode: SyncMode, copy_ratio: Decimal) -> Self {
        Self {
            mode,
            copy_ratio,
            baseline: None,
        }
    }

    #[cfg(test)]
    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    /// Feed the current snapshot pair; captures the baseline the first time in incremental mode.
    pub fn observe(&mut self, target: &AccountState, mine: &AccountState) -> SyncDecision {
        if self.mode == SyncMode::Incremental && self.baseline.is_none() {
            let baseline = Baseline::capture(target, mine);
            info!(
                target_positions = baseline.target_positions.len(),
                my_positions = baseline.my_positions.len(),
                "Baseline captured; following target changes from here"
            );
            self.baseline = Some(baseline);
            return SyncDecision::BaselineCaptured;
        }
        SyncDecision::Reconcile
    }

    /// Size the controller should hold in `instrument` given the target's current size.
    pub fn target_goal(&self, instrument: &str, target_size: Decimal) -> Decimal {
        match (self.mode, &self.baseline) {
            (SyncMode::Incremental, Some(baseline)) => {
                baseline.mine(instrument)
                    + (target_size - baseline.target(instrument)) * self.copy_ratio
            }
            _ => target_size * self.copy_ratio,
        }
    }
}
