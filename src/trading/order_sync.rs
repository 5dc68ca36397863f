//! Order reconciler: change-triggered full resync of the controller's resting orders.
//!
//! When the target's set of order fingerprints changes, every controller
//! order is cancelled and the target's book is rebuilt at scale, highest
//! price first, stopping at the first margin rejection.

use std::collections::BTreeSet;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::models::{AccountState, InstrumentClass, InstrumentRegistry, Order, Side};
use crate::venue::{CancelRequest, Venue};

use super::config::CopyConfig;
use super::sizing::{round_px, round_sz};

/// `(instrument, side, price rounded to 6 significant figures)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderFingerprint {
    pub instrument: String,
    pub side: Side,
    pub price: Decimal,
}

impl OrderFingerprint {
    pub fn of(order: &Order) -> Self {
        Self {
            instrument: order.instrument.clone(),
            side: order.side,
            price: round_px(order.limit_price),
        }
    }
}

/// Scaled copy of one target order.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredOrder {
    pub instrument: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Outcome of one order pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderSyncReport {
    /// Target fingerprint set differed from the previous tick
    pub changed: bool,
    pub cancelled: usize,
    pub cancel_failed: bool,
    pub placed: usize,
    /// Placements rejected for reasons other than margin
    pub failed: usize,
    /// Stopped early on a margin rejection
    pub halted_on_margin: bool,
    /// Desired orders skipped after a margin halt
    pub not_attempted: usize,
}

/// Drives the controller's resting orders toward the scaled target book.
#[derive(Debug, Clone)]
pub struct OrderReconciler {
    copy_ratio: Decimal,
    classes: Vec<InstrumentClass>,
    order_delay: Duration,
    last_fingerprints: Option<BTreeSet<OrderFingerprint>>,
}

impl OrderReconciler {
    pub fn new(copy_ratio: Decimal, classes: Vec<InstrumentClass>, order_delay: Duration) -> Self {
        Self {
            copy_ratio,
            classes,
            order_delay,
            last_fingerprints: None,
        }
    }

    pub fn from_config(config: &CopyConfig) -> Self {
        Self::new(
            config.copy_ratio,
            config.instrument_classes.clone(),
            config.order_delay(),
        )
    }

    pub fn fingerprints<'a>(orders: impl IntoIterator<Item = &'a Order>) -> BTreeSet<OrderFingerprint> {
        orders.into_iter().map(OrderFingerprint::of).collect()
    }

    /// Scale and floor the target's orders, drop zero sizes, sort by price descending.
    ///
    /// The sort is stable, so equal prices keep the target's order.
    pub fn desired_orders<'a>(
        &self,
        target_orders: impl IntoIterator<Item = &'a Order>,
        registry: &InstrumentRegistry,
    ) -> Vec<DesiredOrder> {
        let mut desired: Vec<DesiredOrder> = target_orders
            .into_iter()
            .filter_map(|order| {
                let size = round_sz(
                    order.size * self.copy_ratio,
                    registry.sz_decimals(&order.instrument),
                );
                if size <= Decimal::ZERO {
                    debug!(coin = %order.instrument, price = %order.limit_price, "Scaled order rounds to zero; dropped");
                    return None;
                }
                Some(DesiredOrder {
                    instrument: order.instrument.clone(),
                    side: order.side,
                    price: order.limit_price,
                    size,
                })
            })
            .collect();

        desired.sort_by(|a, b| b.price.cmp(&a.price));
        desired
    }

    /// Run one pass. Never fails; every venue error is logged at its own scope.
    pub async fn reconcile(
        &mut self,
        target: &AccountState,
        mine: &AccountState,
        venue: &dyn Venue,
    ) -> OrderSyncReport {
        let mut report = OrderSyncReport::default();

        let target_orders: Vec<&Order> = target.orders_in(&self.classes).collect();
        let fingerprints = Self::fingerprints(target_orders.iter().copied());

        if self.last_fingerprints.as_ref() == Some(&fingerprints) {
            return report;
        }
        report.changed = true;

        info!(
            target_orders = target_orders.len(),
            fingerprints = fingerprints.len(),
            "Target order book changed; resyncing"
        );

        let cancels: Vec<CancelRequest> = mine
            .orders_in(&self.classes)
            .map(|o| CancelRequest {
                instrument: o.instrument.clone(),
                order_id: o.order_id,
            })
            .collect();

        if !cancels.is_empty() {
            match venue.cancel_orders(&cancels).await {
                Ok(()) => {
                    info!(count = cancels.len(), "Cancelled controller orders");
                    report.cancelled = cancels.len();
                }
                Err(e) => {
                    warn!(count = cancels.len(), error = %e, "Cancel batch failed; continuing");
                    report.cancel_failed = true;
                }
            }
        }

        let desired = self.desired_orders(target_orders.iter().copied(), venue.instruments());
        let total = desired.len();

        for (index, order) in desired.iter().enumerate() {
            match venue
                .place_limit_order(&order.instrument, order.side.is_buy(), order.size, order.price)
                .await
            {
                Ok(ack) => {
                    info!(
                        coin = %order.instrument,
                        side = %order.side,
                        size = %order.size,
                        price = %order.price,
                        order_id = ack.order_id(),
                        "Placed order"
                    );
                    report.placed += 1;
                }
                Err(e) if e.is_margin_rejection() => {
                    report.halted_on_margin = true;
                    report.not_attempted = total - index - 1;
                    warn!(
                        coin = %order.instrument,
                        price = %order.price,
                        remaining = report.not_attempted,
                        error = %e,
                        "Margin exhausted; stopping placement for this tick"
                    );
                    break;
                }
                Err(e) => {
                    error!(coin = %order.instrument, price = %order.price, error = %e, "Order placement failed");
                    report.failed += 1;
                }
            }

            if index + 1 < total && !self.order_delay.is_zero() {
                tokio::time::sleep(self.order_delay).await;
            }
        }

        self.last_fingerprints = Some(fingerprints);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::testing::{Call, RecordingVenue};
    use rust_decimal_macros::dec;

    const ME: &str = "0xme";

    fn make_order(instrument: &str, side: Side, price: Decimal, size: Decimal, id: u64) -> Order {
        Order {
            instrument: instrument.to_string(),
            class: if instrument.starts_with('@') {
                InstrumentClass::Spot
            } else {
                InstrumentClass::Perp
            },
            side,
            limit_price: price,
            size,
            order_id: id,
            placed_at_ms: 0,
        }
    }

    fn book(orders: Vec<Order>) -> AccountState {
        AccountState {
            open_orders: orders,
            ..Default::default()
        }
    }

    fn reconciler(ratio: Decimal) -> OrderReconciler {
        OrderReconciler::new(ratio, InstrumentClass::ALL.to_vec(), Duration::ZERO)
    }

    #[tokio::test]
    async fn test_places_target_book_without_cancels() {
        let venue = RecordingVenue::new(ME);
        let target = book(vec![
            make_order("BTC", Side::Buy, dec!(100), dec!(1), 1),
            make_order("BTC", Side::Buy, dec!(90), dec!(1), 2),
        ]);

        let report = reconciler(dec!(1))
            .reconcile(&target, &AccountState::new(), &venue)
            .await;

        assert_eq!(
            venue.calls(),
            vec![
                Call::Place {
                    instrument: "BTC".to_string(),
                    is_buy: true,
                    size: dec!(1),
                    price: dec!(100)
                },
                Call::Place {
                    instrument: "BTC".to_string(),
                    is_buy: true,
                    size: dec!(1),
                    price: dec!(90)
                },
            ]
        );
        assert_eq!(report.placed, 2);
        assert_eq!(report.cancelled, 0);
    }

    #[tokio::test]
    async fn test_placement_ordered_by_price_descending() {
        let venue = RecordingVenue::new(ME);
        let target = book(vec![
            make_order("ETH", Side::Buy, dec!(100), dec!(1), 1),
            make_order("ETH", Side::Buy, dec!(80), dec!(1), 2),
            make_order("ETH", Side::Sell, dec!(95), dec!(1), 3),
        ]);

        reconciler(dec!(1))
            .reconcile(&target, &AccountState::new(), &venue)
            .await;

        let prices: Vec<Decimal> = venue.placements().into_iter().map(|p| p.3).collect();
        assert_eq!(prices, vec![dec!(100), dec!(95), dec!(80)]);
    }

    #[tokio::test]
    async fn test_equal_prices_keep_target_order() {
        let venue = RecordingVenue::new(ME);
        let target = book(vec![
            make_order("SOL", Side::Buy, dec!(100), dec!(1), 1),
            make_order("AVAX", Side::Buy, dec!(100), dec!(1), 2),
            make_order("ARB", Side::Buy, dec!(100), dec!(1), 3),
        ]);

        reconciler(dec!(1))
            .reconcile(&target, &AccountState::new(), &venue)
            .await;

        let names: Vec<String> = venue.placements().into_iter().map(|p| p.0).collect();
        assert_eq!(names, vec!["SOL", "AVAX", "ARB"]);
    }

    #[tokio::test]
    async fn test_margin_rejection_stops_batch() {
        let mut venue = RecordingVenue::new(ME);
        venue
            .reject_place_at
            .insert(1, "Insufficient margin to place order. asset=0".to_string());
        let target = book(
            (0..5)
                .map(|i| make_order("BTC", Side::Buy, Decimal::from(100 - i), dec!(1), i as u64))
                .collect(),
        );

        let mut reconciler = reconciler(dec!(1));
        let report = reconciler
            .reconcile(&target, &AccountState::new(), &venue)
            .await;

        let prices: Vec<Decimal> = venue.placements().into_iter().map(|p| p.3).collect();
        assert_eq!(prices, vec![dec!(100), dec!(99)]);
        assert!(report.halted_on_margin);
        assert_eq!(report.placed, 1);
        assert_eq!(report.not_attempted, 3);

        // The plan is not retried while the target book is unchanged
        venue.clear_calls();
        reconciler
            .reconcile(&target, &AccountState::new(), &venue)
            .await;
        assert!(venue.calls().is_empty());
    }

    #[tokio::test]
    async fn test_other_rejections_do_not_stop_batch() {
        let mut venue = RecordingVenue::new(ME);
        venue
            .reject_place_at
            .insert(0, "Order must have minimum value of $10.".to_string());
        let target = book(vec![
            make_order("BTC", Side::Buy, dec!(100), dec!(1), 1),
            make_order("BTC", Side::Buy, dec!(90), dec!(1), 2),
        ]);

        let report = reconciler(dec!(1))
            .reconcile(&target, &AccountState::new(), &venue)
            .await;

        assert_eq!(venue.placements().len(), 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.placed, 1);
        assert!(!report.halted_on_margin);
    }

    #[tokio::test]
    async fn test_unchanged_book_is_noop() {
        let venue = RecordingVenue::new(ME);
        let target = book(vec![make_order("BTC", Side::Sell, dec!(101), dec!(2), 1)]);
        let mut reconciler = reconciler(dec!(0.5));

        reconciler.reconcile(&target, &AccountState::new(), &venue).await;
        assert_eq!(venue.calls().len(), 1);

        // Same fingerprints with a different order id and size
        let target = book(vec![make_order("BTC", Side::Sell, dec!(101.0000001), dec!(3), 9)]);
        venue.clear_calls();
        let report = reconciler
            .reconcile(&target, &AccountState::new(), &venue)
            .await;

        assert!(venue.calls().is_empty());
        assert!(!report.changed);
    }

    #[tokio::test]
    async fn test_change_cancels_all_enabled_controller_orders() {
        let venue = RecordingVenue::new(ME);
        let mine = book(vec![
            make_order("BTC", Side::Buy, dec!(95), dec!(0.1), 7),
            make_order("ETH", Side::Sell, dec!(3000), dec!(0.1), 8),
            make_order("@107", Side::Buy, dec!(20), dec!(1), 9),
        ]);
        let target = book(vec![make_order("BTC", Side::Buy, dec!(96), dec!(1), 1)]);

        let mut reconciler =
            OrderReconciler::new(dec!(0.1), vec![InstrumentClass::Perp], Duration::ZERO);
        let report = reconciler.reconcile(&target, &mine, &venue).await;

        let calls = venue.calls();
        assert_eq!(calls[0], Call::Cancel(vec![7, 8]));
        assert_eq!(
            calls[1],
            Call::Place {
                instrument: "BTC".to_string(),
                is_buy: true,
                size: dec!(0.1),
                price: dec!(96)
            }
        );
        assert_eq!(report.cancelled, 2);
    }

    #[tokio::test]
    async fn test_cancel_failure_still_rebuilds() {
        let mut venue = RecordingVenue::new(ME);
        venue.failing_cancel = true;
        let mine = book(vec![make_order("BTC", Side::Buy, dec!(95), dec!(1), 7)]);
        let target = book(vec![make_order("BTC", Side::Buy, dec!(96), dec!(1), 1)]);

        let report = reconciler(dec!(1)).reconcile(&target, &mine, &venue).await;

        assert!(report.cancel_failed);
        assert_eq!(report.placed, 1);
    }

    #[test]
    fn test_desired_orders_scale_floor_and_drop_zero() {
        let reconciler = reconciler(dec!(0.1));
        let orders = vec![
            make_order("BTC", Side::Buy, dec!(100), dec!(0.12345), 1),
            make_order("BTC", Side::Buy, dec!(99), dec!(0.0005), 2),
        ];

        let desired = reconciler.desired_orders(orders.iter(), &InstrumentRegistry::new());

        assert_eq!(desired.len(), 1);
        assert_eq!(desired[0].size, dec!(0.0123));
    }

    #[test]
    fn test_fingerprint_rounds_price() {
        let a = make_order("BTC", Side::Buy, dec!(97123.44), dec!(1), 1);
        let b = make_order("BTC", Side::Buy, dec!(97123.41), dec!(5), 2);
        let c = make_order("BTC", Side::Sell, dec!(97123.44), dec!(1), 3);
        assert_eq!(OrderFingerprint::of(&a), OrderFingerprint::of(&b));
        assert_ne!(OrderFingerprint::of(&a), OrderFingerprint::of(&c));
        assert_eq!(OrderReconciler::fingerprints([&a, &b, &c]).len(), 2);
    }
}
