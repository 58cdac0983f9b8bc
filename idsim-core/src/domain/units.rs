//! Fixed-point units and timestamp helpers.
//!
//! - Prices are cents per MWh (x100).
//! - Volumes are tenths of a MWh (x10).
//! - Money is price x volume, i.e. thousandths of a euro.
//! - Timestamps are milliseconds since the Unix epoch, UTC.
//!
//! Accounting stays in these integer units. Conversion to decimals happens
//! only at reporting boundaries.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

pub type Timestamp = i64;
pub type Price = i32;
pub type Volume = i32;
pub type Money = i64;

pub const PRICE_SCALE: f64 = 100.0;
pub const VOLUME_SCALE: f64 = 10.0;
pub const MONEY_SCALE: f64 = PRICE_SCALE * VOLUME_SCALE;

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;

pub fn price_from_eur(eur_per_mwh: f64) -> Price {
    (eur_per_mwh * PRICE_SCALE).round() as Price
}

/// `price_from_eur` for untrusted input: `None` unless the scaled value is
/// finite and fits a `Price`.
pub fn checked_price_from_eur(eur_per_mwh: f64) -> Option<Price> {
    checked_scale(eur_per_mwh, PRICE_SCALE)
}

pub fn price_to_eur(price: Price) -> f64 {
    price as f64 / PRICE_SCALE
}

pub fn volume_from_mwh(mwh: f64) -> Volume {
    (mwh * VOLUME_SCALE).round() as Volume
}

pub fn checked_volume_from_mwh(mwh: f64) -> Option<Volume> {
    checked_scale(mwh, VOLUME_SCALE)
}

fn checked_scale(value: f64, scale: f64) -> Option<i32> {
    let scaled = (value * scale).round();
    (scaled.is_finite() && scaled >= i32::MIN as f64 && scaled <= i32::MAX as f64)
        .then_some(scaled as i32)
}

pub fn volume_to_mwh(volume: Volume) -> f64 {
    volume as f64 / VOLUME_SCALE
}

pub fn money_to_eur(money: Money) -> f64 {
    money as f64 / MONEY_SCALE
}

/// Cash value of `volume` at `price`.
pub fn cash(price: Price, volume: Volume) -> Money {
    price as Money * volume as Money
}

/// A per-MWh charge (fee, degradation, penalty) as money per volume unit.
pub fn rate_per_unit(eur_per_mwh: f64) -> Money {
    (eur_per_mwh * PRICE_SCALE).round() as Money
}

pub fn hour_floor(ts: Timestamp) -> Timestamp {
    ts.div_euclid(MS_PER_HOUR) * MS_PER_HOUR
}

pub fn hour_ceil(ts: Timestamp) -> Timestamp {
    let floor = hour_floor(ts);
    if floor == ts {
        ts
    } else {
        floor + MS_PER_HOUR
    }
}

pub fn is_hour_aligned(ts: Timestamp) -> bool {
    ts.rem_euclid(MS_PER_HOUR) == 0
}

/// Parse an ISO-like timestamp.
///
/// Accepts RFC 3339 (`2021-03-01T10:00:00Z`, `...T10:00:00.123+01:00`) and
/// naive forms (`2021-03-01T10:00:00`, `2021-03-01 10:00:00.5`), which are
/// read as UTC.
pub fn parse_timestamp(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    NAIVE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(text, fmt)
            .ok()
            .map(|naive| naive.and_utc().timestamp_millis())
    })
}

pub fn to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ts)
}

/// RFC 3339 with millisecond precision; falls back to the raw number.
pub fn format_timestamp(ts: Timestamp) -> String {
    match to_datetime(ts) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ts.to_string(),
    }
}
