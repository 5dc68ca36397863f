//! Size and price rounding.
//!
//! Sizes are always floored toward zero so a scaled copy never exceeds the
//! amount it was derived from. Prices are rounded to significant figures.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::InstrumentClass;

/// Significant figures used for order-book fingerprints.
pub const FINGERPRINT_SIG_FIGS: u32 = 6;

/// Significant figures the venue accepts for order prices.
pub const VENUE_PRICE_SIG_FIGS: u32 = 5;

/// Maximum price decimals before subtracting size decimals.
const MAX_PERP_PRICE_DECIMALS: u32 = 6;
const MAX_SPOT_PRICE_DECIMALS: u32 = 8;

/// Floor a size toward zero at the instrument's size precision.
pub fn round_sz(size: Decimal, sz_decimals: u32) -> Decimal {
    size.round_dp_with_strategy(sz_decimals, RoundingStrategy::ToZero)
        .normalize()
}

/// Round a price to the fingerprint precision (6 significant figures).
pub fn round_px(price: Decimal) -> Decimal {
    round_sig_figs(price, FINGERPRINT_SIG_FIGS)
}

/// Round a price the way the venue accepts it: 5 significant figures, then
/// capped to `6 - szDecimals` decimals for perps and `8 - szDecimals` for spot.
pub fn venue_px(price: Decimal, sz_decimals: u32, class: InstrumentClass) -> Decimal {
    let max_decimals = match class {
        InstrumentClass::Perp => MAX_PERP_PRICE_DECIMALS,
        InstrumentClass::Spot => MAX_SPOT_PRICE_DECIMALS,
    }
    .saturating_sub(sz_decimals);

    round_sig_figs(price, VENUE_PRICE_SIG_FIGS)
        .round_dp_with_strategy(max_decimals, RoundingStrategy::MidpointNearestEven)
        .normalize()
}

/// Round to a number of significant figures (half to even).
pub fn round_sig_figs(value: Decimal, figs: u32) -> Decimal {
    if value.is_zero() || figs == 0 {
        return value;
    }

    let magnitude = order_of_magnitude(value.abs());
    let decimals = figs as i32 - 1 - magnitude;

    if decimals >= 0 {
        value
            .round_dp_with_strategy(decimals as u32, RoundingStrategy::MidpointNearestEven)
            .normalize()
    } else {
        let factor = Decimal::from(10u64.pow((-decimals) as u32));
        ((value / factor).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
            * factor)
            .normalize()
    }
}

/// floor(log10(v)) for a positive value.
fn order_of_magnitude(mut value: Decimal) -> i32 {
    let mut exponent = 0;
    while value >= Decimal::TEN {
        value /= Decimal::TEN;
        exponent += 1;
    }
    while value < Decimal::ONE {
        value *= Decimal::TEN;
        exponent -= 1;
    }
    exponent
}

/// Wire representation of a decimal: at most 8 decimals, no trailing zeros.
pub fn to_wire_string(value: Decimal) -> String {
    value.round_dp(8).normalize().to_string()
}
