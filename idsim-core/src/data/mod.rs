//! Data ingestion: replay ledger, binary and CSV order files, forecasts,
//! synthetic flow.

pub mod binary;
pub mod forecast;
pub mod ingest;
pub mod ledger;
pub mod synthetic;
pub mod tabular;

pub use binary::{decode_orders, encode_orders, read_orders_bin, write_orders_bin};
pub use forecast::{ForecastPrice, ForecastRow, ForecastTable};
pub use ingest::{IngestError, OrderColumns};
pub use ledger::OrderLedger;
pub use synthetic::SyntheticFlow;
pub use tabular::{read_orders_csv, read_orders_csv_from, write_orders_bin_from_csv};
