//! Conversion of raw info-endpoint responses into the unified account shape.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::debug;

use crate::api::{ClearinghouseState, Meta, OpenOrder, SpotClearinghouseState, SpotMeta, UserFill};
use crate::error::{VenueError, VenueResult};
use crate::models::{
    AccountState, Fill, InstrumentClass, InstrumentRegistry, InstrumentSpec, Order, Position, Side,
    SPOT_ASSET_OFFSET,
};

/// Quote token of every mirrored spot pair; its balance is cash, not a position.
pub const QUOTE_TOKEN: &str = "USDC";

fn parse_decimal(field: &str, value: &str) -> VenueResult<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|_| VenueError::Data(format!("invalid {} '{}'", field, value)))
}

fn parse_optional(field: &str, value: Option<&str>) -> VenueResult<Decimal> {
    match value {
        Some(v) if !v.is_empty() => parse_decimal(field, v),
        _ => Ok(Decimal::ZERO),
    }
}

/// Build the instrument registry from perp and spot metadata.
pub fn registry_from_meta(meta: &Meta, spot_meta: &SpotMeta) -> InstrumentRegistry {
    let mut registry = InstrumentRegistry::new();

    for (index, asset) in meta.universe.iter().enumerate() {
        registry.insert(InstrumentSpec {
            name: asset.name.clone(),
            class: InstrumentClass::Perp,
            asset_id: index as u32,
            sz_decimals: asset.sz_decimals,
        });
    }

    let tokens: HashMap<u32, _> = spot_meta.tokens.iter().map(|t| (t.index, t)).collect();

    for pair in &spot_meta.universe {
        let (Some(base), Some(quote)) = (
            pair.tokens.first().and_then(|i| tokens.get(i)),
            pair.tokens.get(1).and_then(|i| tokens.get(i)),
        ) else {
            debug!(pair = %pair.name, "Skipping spot pair with unknown tokens");
            continue;
        };

        registry.insert(InstrumentSpec {
            name: pair.name.clone(),
            class: InstrumentClass::Spot,
            asset_id: SPOT_ASSET_OFFSET + pair.index,
            sz_decimals: base.sz_decimals,
        });

        if quote.name == QUOTE_TOKEN {
            registry.insert_token_pair(base.name.clone(), pair.name.clone());
        }
    }

    registry
}

/// Perp positions from a clearinghouse state; flat positions are dropped.
pub fn perp_positions(state: &ClearinghouseState) -> VenueResult<Vec<Position>> {
    let mut positions = Vec::with_capacity(state.asset_positions.len());

    for asset in &state.asset_positions {
        let raw = &asset.position;
        let size = parse_decimal("szi", &raw.szi)?;
        if size.is_zero() {
            continue;
        }
        let entry = parse_optional("entryPx", raw.entry_px.as_deref())?;
        let leverage = raw.leverage.as_ref().and_then(|l| l.value).unwrap_or(1);

        positions.push(
            Position::new(raw.coin.clone(), InstrumentClass::Perp, size).with_entry(entry, leverage),
        );
    }

    Ok(positions)
}

/// Spot balances keyed by the pair that trades them against USDC.
pub fn spot_positions(
    state: &SpotClearinghouseState,
    registry: &InstrumentRegistry,
) -> VenueResult<Vec<Position>> {
    let mut positions = Vec::new();

    for balance in &state.balances {
        if balance.coin == QUOTE_TOKEN {
            continue;
        }
        let total = parse_decimal("total", &balance.total)?;
        if total.is_zero() {
            continue;
        }
        let Some(pair) = registry.pair_for_token(&balance.coin) else {
            debug!(token = %balance.coin, "No USDC pair for spot token; skipping");
            continue;
        };

        let entry_notional = parse_optional("entryNtl", balance.entry_ntl.as_deref())?;
        let entry = if entry_notional.is_zero() {
            Decimal::ZERO
        } else {
            (entry_notional / total).abs()
        };

        positions.push(Position::new(pair, InstrumentClass::Spot, total).with_entry(entry, 1));
    }

    Ok(positions)
}

/// Open orders with their class resolved from the registry.
pub fn open_orders(raw: &[OpenOrder], registry: &InstrumentRegistry) -> VenueResult<Vec<Order>> {
    raw.iter()
        .map(|o| {
            let side = Side::from_wire(&o.side)
                .ok_or_else(|| VenueError::Data(format!("invalid side '{}'", o.side)))?;
            Ok(Order {
                instrument: o.coin.clone(),
                class: registry.class_of(&o.coin),
                side,
                limit_price: parse_decimal("limitPx", &o.limit_px)?,
                size: parse_decimal("sz", &o.sz)?,
                order_id: o.oid,
                placed_at_ms: o.timestamp,
            })
        })
        .collect()
}

/// Merge whichever raw pieces were fetched into one account state.
pub fn account_state(
    perp: Option<&ClearinghouseState>,
    spot: Option<&SpotClearinghouseState>,
    orders: &[OpenOrder],
    registry: &InstrumentRegistry,
) -> VenueResult<AccountState> {
    let mut state = AccountState::new();

    if let Some(perp) = perp {
        for position in perp_positions(perp)? {
            state.insert_position(position);
        }
    }
    if let Some(spot) = spot {
        for position in spot_positions(spot, registry)? {
            state.insert_position(position);
        }
    }
    state.open_orders = open_orders(orders, registry)?;

    Ok(state)
}

/// Mid prices; entries that do not parse are dropped.
pub fn mids(raw: HashMap<String, String>) -> HashMap<String, Decimal> {
    raw.into_iter()
        .filter_map(|(coin, px)| match Decimal::from_str(&px) {
            Ok(price) => Some((coin, price)),
            Err(_) => {
                debug!(coin = %coin, price = %px, "Unparseable mid price");
                None
            }
        })
        .collect()
}

pub fn fills(raw: &[UserFill]) -> VenueResult<Vec<Fill>> {
    raw.iter()
        .map(|f| {
            Ok(Fill {
                instrument: f.coin.clone(),
                side: Side::from_wire(&f.side)
                    .ok_or_else(|| VenueError::Data(format!("invalid side '{}'", f.side)))?,
                price: parse_decimal("px", &f.px)?,
                size: parse_decimal("sz", &f.sz)?,
                time_ms: f.time,
                hash: f.hash.clone(),
                trade_id: f.tid,
                closed_pnl: parse_optional("closedPnl", f.closed_pnl.as_deref())?,
                fee: parse_optional("fee", f.fee.as_deref())?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_registry() -> InstrumentRegistry {
        let meta: Meta = serde_json::from_str(
            r#"{"universe": [
                {"name": "BTC", "szDecimals": 5},
                {"name": "ETH", "szDecimals": 4}
            ]}"#,
        )
        .unwrap();
        let spot_meta: SpotMeta = serde_json::from_str(
            r#"{
                "universe": [{"name": "@107", "tokens": [150, 0], "index": 107}],
                "tokens": [
                    {"name": "USDC", "szDecimals": 8, "index": 0},
                    {"name": "HYPE", "szDecimals": 2, "index": 150}
                ]
            }"#,
        )
        .unwrap();
        registry_from_meta(&meta, &spot_meta)
    }

    #[test]
    fn test_registry_from_meta() {
        let registry = sample_registry();
        assert_eq!(registry.asset_id("BTC"), Some(0));
        assert_eq!(registry.asset_id("ETH"), Some(1));
        assert_eq!(registry.asset_id("@107"), Some(10_107));
        assert_eq!(registry.sz_decimals("@107"), 2);
        assert_eq!(registry.pair_for_token("HYPE"), Some("@107"));
    }

    #[test]
    fn test_merge_perp_and_spot() {
        let registry = sample_registry();
        let perp: ClearinghouseState = serde_json::from_str(
            r#"{"assetPositions": [
                {"position": {"coin": "ETH", "szi": "-2.5", "entryPx": "3000", "leverage": {"type": "cross", "value": 5}}},
                {"position": {"coin": "BTC", "szi": "0.0", "entryPx": null}}
            ]}"#,
        )
        .unwrap();
        let spot: SpotClearinghouseState = serde_json::from_str(
            r#"{"balances": [
                {"coin": "USDC", "token": 0, "total": "1000.0", "hold": "0.0", "entryNtl": "0.0"},
                {"coin": "HYPE", "token": 150, "total": "10.0", "hold": "0.0", "entryNtl": "250.0"},
                {"coin": "PURR", "token": 1, "total": "5.0", "hold": "0.0", "entryNtl": "1.0"}
            ]}"#,
        )
        .unwrap();
        let orders: Vec<OpenOrder> = serde_json::from_str(
            r#"[
                {"coin": "ETH", "side": "B", "limitPx": "2900.5", "sz": "0.1", "oid": 11, "timestamp": 1700000000000},
                {"coin": "@107", "side": "A", "limitPx": "30", "sz": "2", "oid": 12, "timestamp": 1700000000001}
            ]"#,
        )
        .unwrap();

        let state = account_state(Some(&perp), Some(&spot), &orders, &registry).unwrap();

        assert_eq!(state.positions.len(), 2);
        let eth = &state.positions["ETH"];
        assert_eq!(eth.signed_size, dec!(-2.5));
        assert_eq!(eth.entry_price, dec!(3000));
        assert_eq!(eth.leverage, 5);
        let hype = &state.positions["@107"];
        assert_eq!(hype.class, InstrumentClass::Spot);
        assert_eq!(hype.signed_size, dec!(10));
        assert_eq!(hype.entry_price, dec!(25));

        assert_eq!(state.open_orders.len(), 2);
        assert_eq!(state.open_orders[0].side, Side::Buy);
        assert_eq!(state.open_orders[1].class, InstrumentClass::Spot);
        assert_eq!(state.open_orders[1].side, Side::Sell);
    }

    #[test]
    fn test_malformed_number_fails_snapshot() {
        let perp: ClearinghouseState = serde_json::from_str(
            r#"{"assetPositions": [{"position": {"coin": "ETH", "szi": "abc"}}]}"#,
        )
        .unwrap();
        let result = account_state(Some(&perp), None, &[], &InstrumentRegistry::new());
        assert!(matches!(result, Err(VenueError::Data(_))));
    }

    #[test]
    fn test_mids_skip_bad_entries() {
        let mut raw = HashMap::new();
        raw.insert("BTC".to_string(), "97000.5".to_string());
        raw.insert("BAD".to_string(), "n/a".to_string());
        let parsed = mids(raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["BTC"], dec!(97000.5));
    }
}
