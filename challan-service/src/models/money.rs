//! Money helpers. Amounts are `Decimal` internally and JSON numbers on the wire.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serializer;

/// Rupees to paise: `round(amount * 100)`, half away from zero.
///
/// Returns `None` for negative amounts or values that do not fit in `u64`.
pub fn to_minor_units(amount: Decimal) -> Option<u64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
}

pub fn serialize_decimal<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    match value.to_f64() {
        Some(f) => serializer.serialize_f64(f),
        None => serializer.serialize_str(&value.to_string()),
    }
}

pub fn serialize_opt_decimal<S: Serializer>(
    value: &Option<Decimal>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serialize_decimal(v, serializer),
        None => serializer.serialize_none(),
    }
}
