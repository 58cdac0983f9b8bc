//! CSV order files in the exchange export format.
//!
//! Columns: `id, initial, side, start, transaction, validity, price, quantity`,
//! where `start` is the delivery start, `transaction` the placement time and
//! `validity` the validity end. Prices are EUR/MWh, quantities MWh.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::data::binary::write_orders_bin;
use crate::data::ingest::{build_order, IngestError, RawOrder};
use crate::domain::units::is_hour_aligned;
use crate::domain::LimitOrder;

#[derive(Debug, Deserialize)]
struct OrderRow {
    id: i64,
    initial: i64,
    side: String,
    start: String,
    transaction: String,
    validity: String,
    price: f64,
    quantity: f64,
}

/// Read an order CSV, sorted by placement time.
///
/// Products whose delivery does not start on the hour (quarter-hour and
/// half-hour contracts) are skipped. Any malformed row fails the whole file.
pub fn read_orders_csv_from<R: Read>(reader: R) -> Result<Vec<LimitOrder>, IngestError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut orders = Vec::new();
    let mut skipped = 0usize;

    for (row, record) in rdr.deserialize::<OrderRow>().enumerate() {
        let r = record?;
        let order = build_order(
            row,
            RawOrder {
                id: r.id,
                initial: r.initial,
                side: &r.side,
                delivery: &r.start,
                start: &r.transaction,
                cancel: &r.validity,
                price: r.price,
                volume: r.quantity,
            },
        )?;
        if is_hour_aligned(order.delivery) {
            orders.push(order);
        } else {
            skipped += 1;
        }
    }

    if skipped > 0 {
        warn!(skipped, "skipped orders for non-hourly products");
    }
    orders.sort_by_key(|o| o.start);
    debug!(orders = orders.len(), "parsed order CSV");
    Ok(orders)
}

pub fn read_orders_csv(path: &Path) -> Result<Vec<LimitOrder>, IngestError> {
    read_orders_csv_from(std::fs::File::open(path)?)
}

/// Convert an order CSV into a binary order file. Returns the order count.
pub fn write_orders_bin_from_csv(csv_path: &Path, bin_path: &Path) -> Result<usize, IngestError> {
    let orders = read_orders_csv(csv_path)?;
    write_orders_bin(bin_path, &orders)?;
    Ok(orders.len())
}
