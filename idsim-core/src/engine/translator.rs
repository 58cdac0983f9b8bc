//! Turns the optimizer's plan for the nearest tradable hour into a limit
//! order, or a reason not to place one.

use super::dp::{DpPlan, PlannedHour};
use super::order_book::OrderBook;
use super::pricing::PriceSource;
use crate::domain::{Price, Side, Timestamp, Volume};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranslatorConfig {
    /// Hours closer than this (ms) to delivery are traded through the book.
    pub horizon_end_ms: i64,
    pub inject_max: Volume,
    pub withdraw_max: Volume,
    /// Widening applied to forecast-derived limit prices.
    pub penalty: Price,
    pub check_profit: bool,
    pub check_lo_exec: bool,
}

impl TranslatorConfig {
    /// Largest volume a single order may carry.
    pub fn max_order_volume(&self) -> Volume {
        self.inject_max.max(self.withdraw_max)
    }

    pub fn clip(&self, volume: Volume) -> Volume {
        let cap = self.max_order_volume();
        volume.clamp(-cap, cap)
    }
}

/// A limit order the agent wants in the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentIntent {
    pub delivery: Timestamp,
    pub side: Side,
    pub price: Price,
    /// Unsigned volume at decision time; recomputed at submission.
    pub volume: Volume,
    /// Position the order is meant to reach.
    pub target: Volume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    NoChange,
    NoPrice,
    NotExecutable,
    NotProfitable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    Submit(AgentIntent),
    Hold(HoldReason),
}

#[derive(Debug, Clone)]
pub struct DecisionTranslator {
    config: TranslatorConfig,
}

impl DecisionTranslator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// The plan's first hour, if it is already inside the book window.
    pub fn actionable_hour<'a>(&self, plan: &'a DpPlan, now: Timestamp) -> Option<&'a PlannedHour> {
        plan.hours
            .iter()
            .find(|h| h.delivery > now)
            .filter(|h| h.delivery - now <= self.config.horizon_end_ms)
    }

    pub fn translate(&self, hour: &PlannedHour, book: &OrderBook) -> Translation {
        let trade = self.config.clip(hour.trade);
        let Some(side) = Side::of_signed(trade) else {
            return Translation::Hold(HoldReason::NoChange);
        };

        let price = match hour.source {
            PriceSource::Book => hour.marginal_price,
            PriceSource::Forecast => hour.marginal_price.map(|p| match side {
                Side::Buy => p.saturating_add(self.config.penalty),
                Side::Sell => p.saturating_sub(self.config.penalty),
            }),
            PriceSource::Frozen => None,
        };
        let Some(price) = price else {
            return Translation::Hold(HoldReason::NoPrice);
        };

        if self.config.check_profit && !hour.edge.is_some_and(|edge| edge > 0) {
            return Translation::Hold(HoldReason::NotProfitable);
        }
        if self.config.check_lo_exec {
            let executable = book
                .best_price(hour.delivery, side.opposite())
                .is_some_and(|best| match side {
                    Side::Buy => best <= price,
                    Side::Sell => best >= price,
                });
            if !executable {
                return Translation::Hold(HoldReason::NotExecutable);
            }
        }

        Translation::Submit(AgentIntent {
            delivery: hour.delivery,
            side,
            price,
            volume: trade.abs(),
            target: hour.target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LimitOrder, OrderId};
    use crate::engine::order_book::Owner;

    const H: Timestamp = 7_200_000;

    fn config() -> TranslatorConfig {
        TranslatorConfig {
            horizon_end_ms: 75 * 60_000,
            inject_max: 50,
            withdraw_max: 80,
            penalty: 200,
            check_profit: false,
            check_lo_exec: false,
        }
    }

    fn planned(source: PriceSource, trade: Volume, price: Option<Price>) -> PlannedHour {
        PlannedHour {
            delivery: H,
            source,
            target: trade,
            trade,
            cash: 0,
            net_reward: 0,
            storage_before: 0.0,
            storage_after: 0.0,
            marginal_price: price,
            edge: Some(-1),
        }
    }

    #[test]
    fn forecast_prices_are_widened() {
        let t = DecisionTranslator::new(config());
        let book = OrderBook::new();
        let Translation::Submit(buy) = t.translate(&planned(PriceSource::Forecast, 30, Some(5_000)), &book)
        else {
            panic!("expected an order");
        };
        assert_eq!((buy.side, buy.price, buy.volume), (Side::Buy, 5_200, 30));

        let Translation::Submit(sell) = t.translate(&planned(PriceSource::Forecast, -100, Some(5_000)), &book)
        else {
            panic!("expected an order");
        };
        assert_eq!((sell.side, sell.price, sell.volume), (Side::Sell, 4_800, 80));
    }

    #[test]
    fn holds_without_change_or_price() {
        let t = DecisionTranslator::new(config());
        let book = OrderBook::new();
        assert_eq!(
            t.translate(&planned(PriceSource::Book, 0, Some(1)), &book),
            Translation::Hold(HoldReason::NoChange)
        );
        assert_eq!(
            t.translate(&planned(PriceSource::Book, 10, None), &book),
            Translation::Hold(HoldReason::NoPrice)
        );
    }

    #[test]
    fn checks_gate_orders() {
        let mut cfg = config();
        cfg.check_profit = true;
        let book = OrderBook::new();
        let hour = planned(PriceSource::Forecast, 10, Some(5_000));
        assert_eq!(
            DecisionTranslator::new(cfg).translate(&hour, &book),
            Translation::Hold(HoldReason::NotProfitable)
        );

        let mut cfg = config();
        cfg.check_lo_exec = true;
        let t = DecisionTranslator::new(cfg);
        assert_eq!(
            t.translate(&hour, &book),
            Translation::Hold(HoldReason::NotExecutable)
        );

        let mut book = OrderBook::new();
        book.submit(
            LimitOrder {
                id: OrderId(1),
                initial_id: OrderId(1),
                start: 0,
                cancel: H,
                delivery: H,
                side: Side::Sell,
                price: 5_100,
                volume: 10,
            },
            Owner::Market,
        )
        .unwrap();
        assert!(matches!(t.translate(&hour, &book), Translation::Submit(_)));
    }

    #[test]
    fn only_hours_inside_the_window_are_actionable() {
        let t = DecisionTranslator::new(config());
        let plan = DpPlan {
            hours: vec![planned(PriceSource::Forecast, 10, Some(1))],
            expected_value: Some(0),
            feasible: true,
        };
        assert!(t.actionable_hour(&plan, H - 2 * 3_600_000).is_none());
        assert!(t.actionable_hour(&plan, H - 60 * 60_000).is_some());
        assert!(t.actionable_hour(&plan, H).is_none());
    }
}
