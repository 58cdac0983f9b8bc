//! Ingestion errors and the in-memory tabular order source.

use crate::domain::units::{checked_price_from_eur, checked_volume_from_mwh, parse_timestamp};
use crate::domain::{LimitOrder, OrderId, Side, Timestamp, Volume};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("row {row}: missing value for `{field}`")]
    MissingField { row: usize, field: &'static str },

    #[error("row {row}: cannot parse timestamp `{value}` in `{field}`")]
    BadTimestamp {
        row: usize,
        field: &'static str,
        value: String,
    },

    #[error("row {row}: invalid `{field}`: {reason}")]
    BadValue {
        row: usize,
        field: &'static str,
        reason: String,
    },

    #[error("column `{column}` has {len} rows, expected {expected}")]
    ColumnLength {
        column: &'static str,
        len: usize,
        expected: usize,
    },

    #[error("order {id} placed at {start}, before the preceding order ({previous})")]
    NonMonotonic {
        id: OrderId,
        start: Timestamp,
        previous: Timestamp,
    },

    #[error("order {id}: volume must be positive, got {volume}")]
    NonPositiveVolume { id: OrderId, volume: Volume },

    #[error("order {id}: delivery {delivery} is not the start of an hour")]
    UnalignedDelivery { id: OrderId, delivery: Timestamp },

    #[error("forecast for {delivery} is not the start of an hour")]
    UnalignedForecast { delivery: Timestamp },

    #[error("binary order file: bad magic bytes")]
    BadMagic,

    #[error("binary order file: unsupported version {0}")]
    UnsupportedVersion(u16),

    #[error("binary order file: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("binary order file: digest mismatch")]
    DigestMismatch,

    #[error("binary order file: record {index} has invalid side code {code}")]
    BadSideCode { index: usize, code: u8 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Column-oriented order batch, as handed over by a dataframe-like host.
///
/// Field meanings follow the exchange export: `deliveries` is the product's
/// delivery start, `starts` the placement (transaction) time, and `cancels`
/// the validity end. Prices are EUR/MWh and volumes MWh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderColumns {
    pub ids: Vec<i64>,
    pub initials: Vec<i64>,
    pub sides: Vec<String>,
    pub deliveries: Vec<String>,
    pub starts: Vec<String>,
    pub cancels: Vec<String>,
    pub prices: Vec<f64>,
    pub volumes: Vec<f64>,
}

impl OrderColumns {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Convert to orders. Any bad row fails the whole batch.
    pub fn to_orders(&self) -> Result<Vec<LimitOrder>, IngestError> {
        let expected = self.ids.len();
        let lengths = [
            ("initials", self.initials.len()),
            ("sides", self.sides.len()),
            ("deliveries", self.deliveries.len()),
            ("starts", self.starts.len()),
            ("cancels", self.cancels.len()),
            ("prices", self.prices.len()),
            ("volumes", self.volumes.len()),
        ];
        if let Some(&(column, len)) = lengths.iter().find(|(_, len)| *len != expected) {
            return Err(IngestError::ColumnLength {
                column,
                len,
                expected,
            });
        }

        (0..expected)
            .map(|row| {
                build_order(
                    row,
                    RawOrder {
                        id: self.ids[row],
                        initial: self.initials[row],
                        side: &self.sides[row],
                        delivery: &self.deliveries[row],
                        start: &self.starts[row],
                        cancel: &self.cancels[row],
                        price: self.prices[row],
                        volume: self.volumes[row],
                    },
                )
            })
            .collect()
    }
}

/// One textual order row before validation.
pub(crate) struct RawOrder<'a> {
    pub id: i64,
    pub initial: i64,
    pub side: &'a str,
    pub delivery: &'a str,
    pub start: &'a str,
    pub cancel: &'a str,
    pub price: f64,
    pub volume: f64,
}

pub(crate) fn build_order(row: usize, raw: RawOrder<'_>) -> Result<LimitOrder, IngestError> {
    let side = raw
        .side
        .parse::<Side>()
        .map_err(|reason| IngestError::BadValue {
            row,
            field: "side",
            reason,
        })?;
    let timestamp = |field: &'static str, value: &str| {
        if value.trim().is_empty() {
            return Err(IngestError::MissingField { row, field });
        }
        parse_timestamp(value).ok_or_else(|| IngestError::BadTimestamp {
            row,
            field,
            value: value.to_string(),
        })
    };
    let price = checked_price_from_eur(raw.price).ok_or_else(|| IngestError::BadValue {
        row,
        field: "price",
        reason: format!("{} EUR/MWh is not a representable price", raw.price),
    })?;
    let volume = checked_volume_from_mwh(raw.volume).ok_or_else(|| IngestError::BadValue {
        row,
        field: "volume",
        reason: format!("{} MWh is not a representable volume", raw.volume),
    })?;

    Ok(LimitOrder {
        id: OrderId(raw.id),
        initial_id: OrderId(raw.initial),
        start: timestamp("start", raw.start)?,
        cancel: timestamp("cancel", raw.cancel)?,
        delivery: timestamp("delivery", raw.delivery)?,
        side,
        price,
        volume,
    })
}
