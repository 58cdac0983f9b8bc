//! Domain types: fixed-point units, orders, identifiers and log records.

pub mod ids;
pub mod logs;
pub mod order;
pub mod units;

pub use ids::{DatasetHash, OrderId, RunId, SyntheticIdGen};
pub use logs::{
    BalancingEntry, DecisionRecord, ExecutedEntry, ForecastEntry, OrderLogEntry, OrderLogKind,
    PriceRecord, SimLogs,
};
pub use order::{LimitOrder, Side};
pub use units::{Money, Price, Timestamp, Volume};
