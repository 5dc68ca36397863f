//! Reconciliation logic: configuration, rounding, sync mode, position and order reconcilers.

mod config;
mod order_sync;
mod position_sync;
pub mod sizing;
mod sync_mode;

pub use config::{usable_private_key, CopyConfig, SyncMode};
pub use order_sync::{OrderReconciler, OrderSyncReport};
pub use position_sync::{PositionReconciler, PositionSyncReport, SkipReason};
pub use sync_mode::{SyncController, SyncDecision};
