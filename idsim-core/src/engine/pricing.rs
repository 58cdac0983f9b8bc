//! Valuation of a trade in one delivery hour: walk the visible book, or
//! fall back to the forecast price pair.

use crate::data::ForecastPrice;
use crate::domain::units::cash;
use crate::domain::{Money, Price, Volume};

/// Aggregated price levels of one book side, best first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ladder {
    levels: Vec<(Price, Volume)>,
}

/// Result of walking a ladder for a given volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    /// Unsigned cash value of the whole volume.
    pub cash: Money,
    /// Worst level touched; `None` for a zero volume.
    pub worst: Option<Price>,
}

impl Ladder {
    pub fn new(levels: Vec<(Price, Volume)>) -> Self {
        Self { levels }
    }

    pub fn levels(&self) -> &[(Price, Volume)] {
        &self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Total visible volume.
    pub fn depth(&self) -> Volume {
        self.levels.iter().map(|(_, v)| *v).sum()
    }

    /// Walk the levels for `volume`. `None` if the ladder is too thin.
    pub fn sweep(&self, volume: Volume) -> Option<Sweep> {
        let mut left = volume.max(0);
        let mut total: Money = 0;
        let mut worst = None;
        for &(price, available) in &self.levels {
            if left == 0 {
                break;
            }
            let take = available.min(left);
            total += cash(price, take);
            worst = Some(price);
            left -= take;
        }
        (left == 0).then_some(Sweep { cash: total, worst })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Book,
    Forecast,
    Frozen,
}

/// How the optimizer values trades in one delivery hour.
#[derive(Debug, Clone, PartialEq)]
pub enum HourPricing {
    /// Visible market liquidity: buys walk `asks`, sells walk `bids`.
    Book { asks: Ladder, bids: Ladder },
    Forecast(ForecastPrice),
    /// Nothing to price against; only holding is allowed.
    Frozen,
}

impl HourPricing {
    pub fn source(&self) -> PriceSource {
        match self {
            HourPricing::Book { .. } => PriceSource::Book,
            HourPricing::Forecast(_) => PriceSource::Forecast,
            HourPricing::Frozen => PriceSource::Frozen,
        }
    }

    pub fn is_forecast(&self) -> bool {
        matches!(self, HourPricing::Forecast(_))
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, HourPricing::Frozen)
    }

    /// Signed cash flow of trading `delta` (positive buys, so buying costs).
    ///
    /// `None` when the trade cannot be priced: beyond book depth, or any
    /// non-zero trade in a frozen hour.
    pub fn trade_cash(&self, delta: Volume) -> Option<Money> {
        if delta == 0 {
            return Some(0);
        }
        match self {
            HourPricing::Book { asks, bids } => {
                if delta > 0 {
                    asks.sweep(delta).map(|s| -s.cash)
                } else {
                    bids.sweep(-delta).map(|s| s.cash)
                }
            }
            HourPricing::Forecast(price) => {
                if delta > 0 {
                    Some(-cash(price.buy, delta))
                } else {
                    Some(cash(price.sell, -delta))
                }
            }
            HourPricing::Frozen => None,
        }
    }

    /// Price a limit order needs to trade `delta` in full.
    pub fn marginal_price(&self, delta: Volume) -> Option<Price> {
        match self {
            HourPricing::Book { asks, bids } => {
                if delta > 0 {
                    asks.sweep(delta)?.worst
                } else if delta < 0 {
                    bids.sweep(-delta)?.worst
                } else {
                    None
                }
            }
            HourPricing::Forecast(price) => match delta {
                d if d > 0 => Some(price.buy),
                d if d < 0 => Some(price.sell),
                _ => None,
            },
            HourPricing::Frozen => None,
        }
    }
}
