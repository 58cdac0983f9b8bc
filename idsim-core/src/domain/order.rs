use super::ids::OrderId;
use super::units::{Price, Timestamp, Volume};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> Volume {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    /// Side of a signed trade volume; `None` for zero.
    pub fn of_signed(volume: Volume) -> Option<Self> {
        match volume {
            v if v > 0 => Some(Side::Buy),
            v if v < 0 => Some(Side::Sell),
            _ => None,
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "B" => Ok(Side::Buy),
            "SELL" | "S" => Ok(Side::Sell),
            other => Err(format!("unknown side `{other}`")),
        }
    }
}

/// One version of an exchange limit order.
///
/// Eligible for matching only within `[start, cancel)`. `delivery` is the
/// start of the delivery hour it trades. `initial_id` links every later
/// version and partial-fill residual back to the first version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub id: OrderId,
    pub initial_id: OrderId,
    pub start: Timestamp,
    pub cancel: Timestamp,
    pub delivery: Timestamp,
    pub side: Side,
    pub price: Price,
    pub volume: Volume,
}

impl LimitOrder {
    pub fn is_live_at(&self, time: Timestamp) -> bool {
        self.start <= time && time < self.cancel
    }

    /// Volume signed by side (buys positive).
    pub fn signed_volume(&self) -> Volume {
        self.side.sign() * self.volume
    }

    /// Whether a resting order at `resting_price` can trade with this one.
    pub fn crosses(&self, resting_price: Price) -> bool {
        match self.side {
            Side::Buy => resting_price <= self.price,
            Side::Sell => resting_price >= self.price,
        }
    }
}
