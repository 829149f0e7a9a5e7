//! Shared helpers: Decimal ↔ f64 conversion and hour arithmetic.
//!
//! Forecast values, risk scores and spreads are stored at 1 dp
//! (`f64_to_decimal_1dp`). Coordinates and threshold limits are rounded to
//! their column scale (`f64_to_decimal_scaled`) so a value read back compares
//! equal to the one written. NaN and ±Inf become `Decimal::ZERO`.

use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Scale of `sites.latitude` / `sites.longitude` (NUMERIC(9, 6)).
pub(crate) const COORD_SCALE: u32 = 6;
/// Scale of the wind, gust, precipitation and temperature limits (NUMERIC(6, 2)).
pub(crate) const THRESHOLD_SCALE: u32 = 2;
/// Scale of the visibility limits (NUMERIC(8, 1)).
pub(crate) const VISIBILITY_SCALE: u32 = 1;

/// Returns false (and logs) for values a NUMERIC column cannot hold.
fn storable(v: f64, what: &str) -> bool {
    if v.is_finite() {
        return true;
    }
    tracing::warn!("{} received non-finite value {}, storing 0", what, v);
    false
}

/// Round to 1 dp for storage.
pub(crate) fn f64_to_decimal_1dp(v: f64) -> Decimal {
    if !storable(v, "f64_to_decimal_1dp") {
        return Decimal::ZERO;
    }
    Decimal::from_f64(round_1dp(v))
        .map(|d| d.round_dp(1))
        .unwrap_or_default()
}

pub(crate) fn opt_f64_to_decimal_1dp(v: Option<f64>) -> Option<Decimal> {
    v.map(f64_to_decimal_1dp)
}

/// Convert to Decimal rounded to `scale` places, half away from zero as
/// Postgres NUMERIC does.
pub(crate) fn f64_to_decimal_scaled(v: f64, scale: u32) -> Decimal {
    if !storable(v, "f64_to_decimal_scaled") {
        return Decimal::ZERO;
    }
    Decimal::from_f64(v)
        .unwrap_or_else(|| Decimal::new(v as i64, 0))
        .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a Decimal to f64, defaulting to 0.0 for values that can't be represented.
pub(crate) fn dec_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Convert an Option<Decimal> to Option<f64>.
pub(crate) fn opt_dec_to_f64(d: Option<Decimal>) -> Option<f64> {
    d.and_then(|v| v.to_f64())
}

/// Round to one decimal place for JSON output.
pub(crate) fn round_1dp(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Floor a datetime to the start of its hour.
pub(crate) fn floor_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(dt.time().hour(), 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(dt)
}

/// Hourly UTC instants in `[start, end)`.
pub(crate) fn hourly_grid(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut times = Vec::new();
    let mut current = floor_to_hour(start);
    while current < end {
        times.push(current);
        current += Duration::hours(1);
    }
    times
}
