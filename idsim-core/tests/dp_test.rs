//! Integration tests for the dispatch optimizer.
//!
//! Tests:
//! 1. Mixed book and forecast horizon: buy from the book, sell on forecast
//! 2. Charging losses shrink the usable spread
//! 3. Losses that eat the whole spread leave the battery idle

use idsim_core::data::ForecastPrice;
use idsim_core::domain::Timestamp;
use idsim_core::engine::{
    DpConfig, DpSolver, HourPricing, HourSlot, Ladder, PriceSource, StorageModel,
};

const H: Timestamp = 1_609_462_800_000;
const HOUR: Timestamp = 3_600_000;

fn solver(loss_in: f64) -> DpSolver {
    DpSolver::new(DpConfig {
        storage: StorageModel {
            max: 10.0,
            loss_in,
            loss_out: 1.0,
        },
        num_states: 11,
        inject_max: 100,
        withdraw_max: 100,
        fee: 0,
        degradation: 0,
        penalty: 0,
    })
}

fn forecast_slot(delivery: Timestamp, buy: i32, sell: i32) -> HourSlot {
    HourSlot {
        delivery,
        pricing: HourPricing::Forecast(ForecastPrice { buy, sell }),
        executed: 0,
        committed: 0,
    }
}

#[test]
fn buys_from_book_and_sells_on_forecast() {
    let book = HourSlot {
        delivery: H,
        pricing: HourPricing::Book {
            asks: Ladder::new(vec![(3_000, 200)]),
            bids: Ladder::new(vec![(2_900, 200)]),
        },
        executed: 0,
        committed: 0,
    };
    let plan = solver(1.0).solve(0.0, &[book, forecast_slot(H + HOUR, 7_000, 6_900)]);

    assert!(plan.feasible);
    assert_eq!(plan.expected_value, Some(690_000 - 300_000));

    let first = &plan.hours[0];
    assert_eq!(first.source, PriceSource::Book);
    assert_eq!((first.target, first.trade), (100, 100));
    assert_eq!(first.cash, -300_000);
    assert_eq!(first.marginal_price, Some(3_000));
    assert_eq!(first.edge, Some(390_000));
    assert_eq!(first.storage_after, 10.0);

    let second = &plan.hours[1];
    assert_eq!(second.source, PriceSource::Forecast);
    assert_eq!(second.target, -100);
    assert_eq!(second.storage_after, 0.0);
}

#[test]
fn charging_losses_limit_the_cycle() {
    let slots = [
        forecast_slot(H, 2_000, 2_000),
        forecast_slot(H + HOUR, 5_000, 5_000),
    ];
    let plan = solver(0.5).solve(0.0, &slots);

    // 10 MWh bought store 5 MWh, all of it sold in the second hour.
    assert_eq!(plan.hours[0].target, 100);
    assert_eq!(plan.hours[0].storage_after, 5.0);
    assert_eq!(plan.hours[1].target, -50);
    assert_eq!(plan.expected_value, Some(50_000));
}

#[test]
fn losses_that_eat_the_spread_leave_the_battery_idle() {
    let slots = [
        forecast_slot(H, 2_000, 2_000),
        forecast_slot(H + HOUR, 5_000, 5_000),
    ];
    let plan = solver(0.4).solve(0.0, &slots);

    assert_eq!(plan.expected_value, Some(0));
    assert!(plan.hours.iter().all(|h| h.target == 0 && h.trade == 0));
}
