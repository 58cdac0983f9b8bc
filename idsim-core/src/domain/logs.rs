//! Flat log records produced by settlement.
//!
//! All values stay in fixed-point units; exporters convert to decimals.

use super::ids::OrderId;
use super::order::{LimitOrder, Side};
use super::units::{Money, Price, Timestamp, Volume};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderLogKind {
    /// A book order the agent traded against.
    Accepted,
    /// An accepted order whose remainder left the book unfilled.
    Removed,
}

/// A book order as seen by the agent, with a kind discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLogEntry {
    pub kind: OrderLogKind,
    pub dp_run: u32,
    pub time: Timestamp,
    pub id: OrderId,
    pub initial_id: OrderId,
    pub start: Timestamp,
    pub cancel: Timestamp,
    pub delivery: Timestamp,
    pub side: Side,
    pub price: Price,
    /// Accepted: volume before the fill. Removed: the unfilled remainder.
    pub volume: Volume,
    pub partial: bool,
    /// Accepted: volume taken by the agent. Removed: cumulative filled volume.
    pub partial_volume: Volume,
}

impl OrderLogEntry {
    pub fn accepted(dp_run: u32, time: Timestamp, order: &LimitOrder, taken: Volume) -> Self {
        Self::from_order(OrderLogKind::Accepted, dp_run, time, order, taken < order.volume, taken)
    }

    pub fn removed(dp_run: u32, time: Timestamp, remainder: &LimitOrder, filled: Volume) -> Self {
        Self::from_order(OrderLogKind::Removed, dp_run, time, remainder, true, filled)
    }

    fn from_order(
        kind: OrderLogKind,
        dp_run: u32,
        time: Timestamp,
        order: &LimitOrder,
        partial: bool,
        partial_volume: Volume,
    ) -> Self {
        Self {
            kind,
            dp_run,
            time,
            id: order.id,
            initial_id: order.initial_id,
            start: order.start,
            cancel: order.cancel,
            delivery: order.delivery,
            side: order.side,
            price: order.price,
            volume: order.volume,
            partial,
            partial_volume,
        }
    }
}

/// A trade the agent executed through the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedEntry {
    pub dp_run: u32,
    pub time: Timestamp,
    pub last_solve_time: Timestamp,
    pub delivery: Timestamp,
    /// Cash flow of the trade, before fees and degradation.
    pub reward: Money,
    /// Cash flow net of trading fee and degradation cost.
    pub reward_incl_deg: Money,
    /// Signed volume (buys positive).
    pub volume: Volume,
    pub side: Side,
    pub final_pos: Volume,
    pub final_stor: f64,
    pub prae_final_pos: Volume,
    pub prae_final_stor: f64,
    /// Storage at the start of the first undelivered hour when the trade happened.
    pub initial_storage: f64,
}

/// A recommendation that was not (yet) executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub dp_run: u32,
    pub time: Timestamp,
    pub last_solve_time: Timestamp,
    pub delivery: Timestamp,
    pub reward: Money,
    /// Recommended position for the delivery hour.
    pub volume: Volume,
    pub volume_previous: Volume,
}

/// Residual settled against the balancing market at hour close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancingEntry {
    pub dp_run: u32,
    pub time: Timestamp,
    pub delivery: Timestamp,
    /// Executed minus committed: negative is a forced purchase, positive a forced sale.
    pub volume: Volume,
    /// Penalized balancing price.
    pub price: Price,
    pub reward: Money,
}

impl BalancingEntry {
    /// The residual expressed as a trade (buys positive).
    pub fn settled_volume(&self) -> Volume {
        -self.volume
    }
}

/// Physical outcome of one delivered hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub delivery: Timestamp,
    /// Storage after delivery.
    pub storage: f64,
    /// Position the battery physically delivered.
    pub position: Volume,
    pub real_reward: Money,
    pub real_reward_no_deg: Money,
}

/// Trade statistics of one delivery hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub delivery: Timestamp,
    pub low: Price,
    pub high: Price,
    pub last: Price,
    pub vwap: Price,
    pub id3: Option<Price>,
    pub id1: Option<Price>,
    pub volume: i64,
}

/// Every record collection a run produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimLogs {
    pub accepted: Vec<OrderLogEntry>,
    pub executed: Vec<ExecutedEntry>,
    pub forecast: Vec<ForecastEntry>,
    pub removed: Vec<OrderLogEntry>,
    pub balancing: Vec<BalancingEntry>,
    pub decisions: Vec<DecisionRecord>,
    pub prices: Vec<PriceRecord>,
}

impl SimLogs {
    /// Executed volume per delivery hour, from the executed log.
    pub fn executed_volume(&self, delivery: Timestamp) -> Volume {
        self.executed
            .iter()
            .filter(|e| e.delivery == delivery)
            .map(|e| e.volume)
            .sum()
    }

    pub fn balancing_for(&self, delivery: Timestamp) -> Option<&BalancingEntry> {
        self.balancing.iter().find(|b| b.delivery == delivery)
    }
}
