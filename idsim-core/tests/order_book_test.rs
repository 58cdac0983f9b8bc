//! Integration tests for the continuous intraday order book.
//!
//! Tests:
//! 1. Partial fill at the resting price leaves a renamed residual
//! 2. Delivery hours never match across each other
//! 3. A resting agent order is filled passively by market flow
//! 4. A later version silently replaces its family member

use idsim_core::domain::{LimitOrder, OrderId, Price, Side, Timestamp, Volume};
use idsim_core::engine::{BookEvent, OrderBook, Owner, Trade};

const H1: Timestamp = 1_609_462_800_000;
const H2: Timestamp = H1 + 3_600_000;

fn order(id: i64, side: Side, price: Price, volume: Volume, start: Timestamp, delivery: Timestamp) -> LimitOrder {
    LimitOrder {
        id: OrderId(id),
        initial_id: OrderId(id),
        start,
        cancel: delivery,
        delivery,
        side,
        price,
        volume,
    }
}

fn trades(events: Vec<BookEvent>) -> Vec<Trade> {
    events
        .into_iter()
        .filter_map(|e| match e {
            BookEvent::Trade(t) => Some(t),
            BookEvent::Removed(_) => None,
        })
        .collect()
}

#[test]
fn partial_fill_trades_at_resting_price() {
    let mut book = OrderBook::new();
    book.submit(order(1, Side::Buy, 10_500, 20, 0, H1), Owner::Market)
        .unwrap();
    let events = book
        .submit(order(2, Side::Sell, 10_000, 15, 1, H1), Owner::Market)
        .unwrap();

    assert!(events
        .iter()
        .all(|e| matches!(e, BookEvent::Trade(_))));
    let fills = trades(events);
    assert_eq!(fills.len(), 1);
    assert_eq!((fills[0].price, fills[0].volume), (10_500, 15));

    let residual_id = book.family_member(OrderId(1)).unwrap();
    let residual = book.find(residual_id).unwrap();
    assert_eq!(residual.order.volume, 5);
    assert_eq!(residual.order.initial_id, OrderId(1));
    assert_eq!(book.ladder(H1, Side::Buy), vec![(10_500, 5)]);
    assert!(book.ladder(H1, Side::Sell).is_empty());
}

#[test]
fn delivery_hours_are_separate_books() {
    let mut book = OrderBook::new();
    book.submit(order(1, Side::Sell, 5_000, 10, 0, H1), Owner::Market)
        .unwrap();
    let events = book
        .submit(order(2, Side::Buy, 6_000, 10, 1, H2), Owner::Market)
        .unwrap();

    assert!(events.is_empty());
    assert_eq!(book.best_price(H1, Side::Sell), Some(5_000));
    assert_eq!(book.best_price(H2, Side::Buy), Some(6_000));
    assert_eq!(book.open_deliveries().collect::<Vec<_>>(), vec![H1, H2]);

    assert!(book.close_delivery(H1).is_empty());
    assert!(!book.has_liquidity(H1));
    assert_eq!(book.len(), 1);
}

#[test]
fn resting_agent_order_fills_passively() {
    let mut book = OrderBook::new();
    let agent_id = book.issue_id();
    let mut bid = order(0, Side::Buy, 4_000, 30, 0, H1);
    bid.id = agent_id;
    bid.initial_id = agent_id;
    let owner = Owner::Agent {
        dp_run: 2,
        solve_time: 0,
    };
    assert!(book.submit(bid, owner).unwrap().is_empty());

    let fills = trades(
        book.submit(order(7, Side::Sell, 3_900, 10, 5, H1), Owner::Market)
            .unwrap(),
    );
    assert_eq!(fills.len(), 1);
    let (agent, counterparty) = fills[0].agent_fill().unwrap();
    assert_eq!(agent.owner, owner);
    assert_eq!(counterparty.order.id, OrderId(7));
    assert_eq!(fills[0].price, 4_000);

    // The agent bid keeps its remainder under a fresh id.
    let remainder = book.family_member(agent_id).unwrap();
    assert_eq!(book.find(remainder).unwrap().order.volume, 20);
    assert!(book.ladder(H1, Side::Buy).is_empty());
}

#[test]
fn new_version_replaces_family_silently() {
    let mut book = OrderBook::new();
    book.submit(order(1, Side::Sell, 5_000, 10, 0, H1), Owner::Market)
        .unwrap();

    let mut revised = order(2, Side::Sell, 5_200, 8, 10, H1);
    revised.initial_id = OrderId(1);
    let events = book.submit(revised, Owner::Market).unwrap();

    assert!(events.is_empty());
    assert!(book.find(OrderId(1)).is_none());
    assert_eq!(book.family_member(OrderId(1)), Some(OrderId(2)));
    assert_eq!(book.ladder(H1, Side::Sell), vec![(5_200, 8)]);
}
