//! Forecast table: delivery hour -> (buy, sell) price pair.
//!
//! Each forecast carries the time it was placed. Lookups are "as of" a
//! simulated time, so a run never sees a forecast published after the
//! decision it informs.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::ingest::IngestError;
use crate::domain::units::{checked_price_from_eur, is_hour_aligned, parse_timestamp};
use crate::domain::{Price, Timestamp};

/// Prices at which the optimizer assumes it can buy and sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastPrice {
    pub buy: Price,
    pub sell: Price,
}

impl ForecastPrice {
    /// Midpoint, half a cent rounded away from zero.
    pub fn mid(&self) -> Price {
        ((self.buy as f64 + self.sell as f64) / 2.0).round() as Price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastRow {
    pub delivery: Timestamp,
    pub placement: Timestamp,
    pub price: ForecastPrice,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastTable {
    /// Per delivery hour, forecasts sorted by placement time.
    by_delivery: BTreeMap<Timestamp, Vec<(Timestamp, ForecastPrice)>>,
}

impl ForecastTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rows; any unaligned delivery fails the whole batch.
    pub fn from_rows(rows: &[ForecastRow]) -> Result<Self, IngestError> {
        let mut table = Self::new();
        table.extend(rows)?;
        Ok(table)
    }

    pub fn extend(&mut self, rows: &[ForecastRow]) -> Result<(), IngestError> {
        if let Some(bad) = rows.iter().find(|r| !is_hour_aligned(r.delivery)) {
            return Err(IngestError::UnalignedForecast {
                delivery: bad.delivery,
            });
        }
        for row in rows {
            let entries = self.by_delivery.entry(row.delivery).or_default();
            let at = entries.partition_point(|(placed, _)| *placed <= row.placement);
            entries.insert(at, (row.placement, row.price));
        }
        Ok(())
    }

    /// Latest forecast for `delivery` placed at or before `as_of`.
    pub fn price_for(&self, delivery: Timestamp, as_of: Timestamp) -> Option<ForecastPrice> {
        let entries = self.by_delivery.get(&delivery)?;
        let visible = entries.partition_point(|(placed, _)| *placed <= as_of);
        visible.checked_sub(1).map(|i| entries[i].1)
    }

    /// Latest forecast for `delivery`, regardless of placement time.
    pub fn price_for_latest(&self, delivery: Timestamp) -> Option<ForecastPrice> {
        self.by_delivery
            .get(&delivery)
            .and_then(|entries| entries.last())
            .map(|(_, price)| *price)
    }

    pub fn deliveries(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.by_delivery.keys().copied()
    }

    /// Number of forecast rows.
    pub fn len(&self) -> usize {
        self.by_delivery.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_delivery.is_empty()
    }

    /// Read a forecast CSV with columns `delivery, placement, buy, sell` (EUR/MWh).
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, IngestError> {
        #[derive(Deserialize)]
        struct CsvRow {
            delivery: String,
            placement: String,
            buy: f64,
            sell: f64,
        }

        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut rows = Vec::new();
        for (row, record) in rdr.deserialize::<CsvRow>().enumerate() {
            let r = record?;
            let delivery = parse_timestamp(&r.delivery).ok_or_else(|| IngestError::BadTimestamp {
                row,
                field: "delivery",
                value: r.delivery.clone(),
            })?;
            let placement =
                parse_timestamp(&r.placement).ok_or_else(|| IngestError::BadTimestamp {
                    row,
                    field: "placement",
                    value: r.placement.clone(),
                })?;
            let price = |field: &'static str, eur: f64| {
                checked_price_from_eur(eur).ok_or_else(|| IngestError::BadValue {
                    row,
                    field,
                    reason: format!("{eur} EUR/MWh is not a representable price"),
                })
            };
            rows.push(ForecastRow {
                delivery,
                placement,
                price: ForecastPrice {
                    buy: price("buy", r.buy)?,
                    sell: price("sell", r.sell)?,
                },
            });
        }
        Self::from_rows(&rows)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, IngestError> {
        Self::from_csv_reader(std::fs::File::open(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::units::MS_PER_HOUR;

    const H: Timestamp = 100 * MS_PER_HOUR;

    fn row(delivery: Timestamp, placement: Timestamp, buy: Price, sell: Price) -> ForecastRow {
        ForecastRow {
            delivery,
            placement,
            price: ForecastPrice { buy, sell },
        }
    }

    #[test]
    fn as_of_lookup_ignores_future_forecasts() {
        let table = ForecastTable::from_rows(&[
            row(H, 2_000, 4_000, 3_900),
            row(H, 1_000, 3_000, 2_900),
        ])
        .unwrap();
        assert_eq!(table.price_for(H, 999), None);
        assert_eq!(table.price_for(H, 1_000).map(|p| p.buy), Some(3_000));
        assert_eq!(table.price_for(H, 5_000).map(|p| p.buy), Some(4_000));
        assert_eq!(table.price_for_latest(H).map(|p| p.sell), Some(3_900));
        assert_eq!(table.price_for(H + MS_PER_HOUR, 5_000), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn mid_price() {
        let p = ForecastPrice { buy: 5_001, sell: 4_000 };
        assert_eq!(p.mid(), 4_501);
        let p = ForecastPrice { buy: -5_001, sell: -4_000 };
        assert_eq!(p.mid(), -4_501);
        let p = ForecastPrice { buy: 5_000, sell: 4_000 };
        assert_eq!(p.mid(), 4_500);
    }

    #[test]
    fn parses_csv() {
        let csv = "delivery,placement,buy,sell\n\
                   2021-03-01T10:00:00Z,2021-03-01T00:00:00Z,45.5,44.0\n";
        let table = ForecastTable::from_csv_reader(csv.as_bytes()).unwrap();
        let delivery = parse_timestamp("2021-03-01T10:00:00Z").unwrap();
        let price = table.price_for_latest(delivery).unwrap();
        assert_eq!(price.buy, 4_550);
        assert_eq!(price.sell, 4_400);
    }

    #[test]
    fn rejects_prices_that_do_not_fit() {
        let csv = "delivery,placement,buy,sell\n\
                   2021-03-01T10:00:00Z,2021-03-01T00:00:00Z,1e8,44.0\n";
        assert!(matches!(
            ForecastTable::from_csv_reader(csv.as_bytes()),
            Err(IngestError::BadValue { row: 0, field: "buy", .. })
        ));
    }

    #[test]
    fn rejects_unaligned_delivery() {
        assert!(ForecastTable::from_rows(&[row(H + 1, 0, 1, 1)]).is_err());
    }
}
