//! Continuous limit order book, one book per delivery hour.
//!
//! The book is the central registry for every resting order, replayed or
//! agent-issued. It manages:
//! - Price-time priority per side (best level first, FIFO within a level)
//! - Crossing of incoming orders at the resting order's price
//! - Partial-fill residuals (fresh synthetic id, same queue slot, same family)
//! - Expiry at the `cancel` timestamp and removal at delivery close
//! - Attribution of trades to the agent, and the agent's consumption of
//!   market orders across later versions of the same family
//!
//! The book does NOT value trades or touch storage; that is settlement's job.
//! It only reports what traded and what left the book.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};

use thiserror::Error;
use tracing::trace;

use crate::domain::{LimitOrder, OrderId, Price, Side, SyntheticIdGen, Timestamp, Volume};

/// Errors from order book operations.
///
/// Time-ordering errors are fatal for a run: they mean the replay feed was
/// built wrong.
#[derive(Debug, Error, PartialEq)]
pub enum OrderBookError {
    #[error("order {id} starts at {start}, behind book time {now}")]
    OutOfOrder {
        id: OrderId,
        start: Timestamp,
        now: Timestamp,
    },

    #[error("book time cannot move back from {now} to {requested}")]
    TimeReversal { now: Timestamp, requested: Timestamp },

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {0} is already in the book")]
    DuplicateId(OrderId),
}

/// Who placed a resting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Market,
    Agent { dp_run: u32, solve_time: Timestamp },
}

impl Owner {
    pub fn is_agent(&self) -> bool {
        matches!(self, Owner::Agent { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    /// Current version; `volume` is the unfilled remainder.
    pub order: LimitOrder,
    pub owner: Owner,
    pub original_volume: Volume,
    pub filled: Volume,
    /// DP run of the agent that first traded against this order.
    pub accepted_by: Option<u32>,
}

impl RestingOrder {
    pub fn new(order: LimitOrder, owner: Owner) -> Self {
        let original_volume = order.volume;
        Self {
            order,
            owner,
            original_volume,
            filled: 0,
            accepted_by: None,
        }
    }
}

/// One side of a trade, as it stood right before the fill.
#[derive(Debug, Clone, PartialEq)]
pub struct FillSide {
    pub order: LimitOrder,
    pub owner: Owner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub time: Timestamp,
    pub delivery: Timestamp,
    pub price: Price,
    pub volume: Volume,
    pub resting: FillSide,
    pub incoming: FillSide,
}

impl Trade {
    /// `(agent, counterparty)` when exactly one side belongs to the agent.
    pub fn agent_fill(&self) -> Option<(&FillSide, &FillSide)> {
        match (self.resting.owner.is_agent(), self.incoming.owner.is_agent()) {
            (true, false) => Some((&self.resting, &self.incoming)),
            (false, true) => Some((&self.incoming, &self.resting)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Expired,
    Cancelled,
    DeliveryClosed,
}

/// A market order the agent traded against left the book with volume left.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub time: Timestamp,
    /// The remainder as it left the book.
    pub order: LimitOrder,
    pub filled: Volume,
    pub original_volume: Volume,
    pub accepted_by: u32,
    pub reason: RemovalReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookEvent {
    Trade(Trade),
    Removed(Removal),
}

#[derive(Debug, Clone, Copy)]
struct Location {
    delivery: Timestamp,
    side: Side,
    key: i64,
    initial_id: OrderId,
}

/// Volume the agent took out of one order family.
#[derive(Debug, Clone, Copy)]
struct Consumption {
    volume: Volume,
    dp_run: u32,
}

type Levels = BTreeMap<i64, VecDeque<RestingOrder>>;

#[derive(Debug, Clone, Default)]
struct HourBook {
    bids: Levels,
    asks: Levels,
}

impl HourBook {
    fn side(&self, side: Side) -> &Levels {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Levels {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

fn record_consumption(
    market: &mut RestingOrder,
    dp_run: u32,
    volume: Volume,
    consumed: &mut HashMap<OrderId, Consumption>,
) {
    market.accepted_by.get_or_insert(dp_run);
    consumed
        .entry(market.order.initial_id)
        .or_insert(Consumption { volume: 0, dp_run })
        .volume += volume;
}

/// Level key: ascending key order is best-first on both sides.
fn level_key(side: Side, price: Price) -> i64 {
    match side {
        Side::Buy => -(price as i64),
        Side::Sell => price as i64,
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    now: Timestamp,
    hours: BTreeMap<Timestamp, HourBook>,
    index: HashMap<OrderId, Location>,
    /// Initial id -> id of the family's version currently resting.
    families: HashMap<OrderId, OrderId>,
    expiries: BinaryHeap<Reverse<(Timestamp, OrderId)>>,
    agent_consumed: HashMap<OrderId, Consumption>,
    ids: SyntheticIdGen,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Public API ─────────────────────────────────────────────────────

    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Next synthetic (negative) order id.
    pub fn issue_id(&mut self) -> OrderId {
        self.ids.next_id()
    }

    /// Move book time forward, expiring every order whose `cancel` ≤ `time`.
    pub fn advance_to(&mut self, time: Timestamp) -> Result<Vec<BookEvent>, OrderBookError> {
        if time < self.now {
            return Err(OrderBookError::TimeReversal {
                now: self.now,
                requested: time,
            });
        }
        self.now = time;

        let mut events = Vec::new();
        while let Some(Reverse((cancel, id))) = self.expiries.peek().copied() {
            if cancel > time {
                break;
            }
            self.expiries.pop();
            // Entries for filled, renamed or cancelled orders are stale.
            let live = self
                .find(id)
                .is_some_and(|resting| resting.order.cancel == cancel);
            if !live {
                continue;
            }
            if let Some(removal) = self.take(id, RemovalReason::Expired) {
                events.push(BookEvent::Removed(removal));
            }
        }
        Ok(events)
    }

    /// Advance to the order's start, then cross it and rest any remainder.
    ///
    /// A market order supersedes the resting version of its family. Volume
    /// the agent already consumed from the family is deducted; a version
    /// reduced to nothing is dropped.
    pub fn submit(
        &mut self,
        order: LimitOrder,
        owner: Owner,
    ) -> Result<Vec<BookEvent>, OrderBookError> {
        if order.start < self.now {
            return Err(OrderBookError::OutOfOrder {
                id: order.id,
                start: order.start,
                now: self.now,
            });
        }
        let mut events = self.advance_to(order.start)?;
        if self.index.contains_key(&order.id) {
            return Err(OrderBookError::DuplicateId(order.id));
        }
        if order.cancel <= order.start || order.volume <= 0 {
            return Ok(events);
        }

        let mut incoming = RestingOrder::new(order, owner);
        if owner == Owner::Market {
            if let Some(previous) = self.families.get(&incoming.order.initial_id).copied() {
                self.take(previous, RemovalReason::Cancelled);
            }
            if let Some(consumed) = self.agent_consumed.get(&incoming.order.initial_id) {
                incoming.order.volume -= consumed.volume;
                incoming.filled = consumed.volume;
                incoming.accepted_by = Some(consumed.dp_run);
                if incoming.order.volume <= 0 {
                    trace!(id = %incoming.order.id, "version fully consumed by agent, dropped");
                    return Ok(events);
                }
            }
        }

        let trades = self.match_against(&mut incoming);
        let traded = !trades.is_empty();
        events.extend(trades.into_iter().map(BookEvent::Trade));

        if incoming.order.volume > 0 {
            if traded {
                incoming.order.id = self.ids.next_id();
            }
            self.rest(incoming);
        }
        Ok(events)
    }

    /// Cross `incoming` against the opposite side of its delivery hour.
    ///
    /// Fills at resting prices while the books cross. Reduces both sides in
    /// place and renames partially filled resting orders; `incoming` is not
    /// rested here.
    pub fn match_against(&mut self, incoming: &mut RestingOrder) -> Vec<Trade> {
        let now = self.now;
        let delivery = incoming.order.delivery;
        let Self {
            hours,
            index,
            families,
            expiries,
            agent_consumed,
            ids,
            ..
        } = self;
        let Some(book) = hours.get_mut(&delivery) else {
            return Vec::new();
        };
        let opposite = book.side_mut(incoming.order.side.opposite());

        let mut trades = Vec::new();
        while incoming.order.volume > 0 {
            let Some((&key, queue)) = opposite.iter_mut().next() else {
                break;
            };
            let Some(resting) = queue.front_mut() else {
                opposite.remove(&key);
                continue;
            };
            if !incoming.order.crosses(resting.order.price) {
                break;
            }

            let volume = resting.order.volume.min(incoming.order.volume);
            let trade = Trade {
                time: now,
                delivery,
                price: resting.order.price,
                volume,
                resting: FillSide {
                    order: resting.order.clone(),
                    owner: resting.owner,
                },
                incoming: FillSide {
                    order: incoming.order.clone(),
                    owner: incoming.owner,
                },
            };
            trace!(
                delivery,
                price = trade.price,
                volume,
                resting = %resting.order.id,
                incoming = %incoming.order.id,
                "fill"
            );

            match (resting.owner, incoming.owner) {
                (Owner::Market, Owner::Agent { dp_run, .. }) => {
                    record_consumption(resting, dp_run, volume, agent_consumed)
                }
                (Owner::Agent { dp_run, .. }, Owner::Market) => {
                    record_consumption(incoming, dp_run, volume, agent_consumed)
                }
                _ => {}
            }
            resting.order.volume -= volume;
            resting.filled += volume;
            incoming.order.volume -= volume;
            incoming.filled += volume;

            if resting.order.volume == 0 {
                let done = resting.order.id;
                let initial = resting.order.initial_id;
                queue.pop_front();
                if queue.is_empty() {
                    opposite.remove(&key);
                }
                index.remove(&done);
                if families.get(&initial) == Some(&done) {
                    families.remove(&initial);
                }
            } else {
                let old = resting.order.id;
                let renamed = ids.next_id();
                resting.order.id = renamed;
                if let Some(location) = index.remove(&old) {
                    index.insert(renamed, location);
                }
                families.insert(resting.order.initial_id, renamed);
                expiries.push(Reverse((resting.order.cancel, renamed)));
            }
            trades.push(trade);
        }
        trades
    }

    /// Remove one resting order by id.
    pub fn cancel(&mut self, id: OrderId) -> Result<Option<Removal>, OrderBookError> {
        if !self.index.contains_key(&id) {
            return Err(OrderBookError::OrderNotFound(id));
        }
        Ok(self.take(id, RemovalReason::Cancelled))
    }

    /// Remove whichever version of a family is resting. `None` if none is,
    /// or if the removal is not logged.
    pub fn cancel_family(&mut self, initial_id: OrderId) -> Option<Removal> {
        let id = self.families.get(&initial_id).copied()?;
        self.take(id, RemovalReason::Cancelled)
    }

    /// Drop every order for `delivery`.
    pub fn close_delivery(&mut self, delivery: Timestamp) -> Vec<Removal> {
        let Some(book) = self.hours.remove(&delivery) else {
            return Vec::new();
        };
        let mut removals = Vec::new();
        for levels in [book.bids, book.asks] {
            for resting in levels.into_values().flatten() {
                self.forget(&resting.order);
                if let Some(removal) = self.removal(resting, RemovalReason::DeliveryClosed) {
                    removals.push(removal);
                }
            }
        }
        removals
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// Aggregated market levels of one side, best first. Agent orders are
    /// excluded.
    pub fn ladder(&self, delivery: Timestamp, side: Side) -> Vec<(Price, Volume)> {
        let Some(book) = self.hours.get(&delivery) else {
            return Vec::new();
        };
        book.side(side)
            .values()
            .filter_map(|queue| {
                let price = queue.front()?.order.price;
                let volume: Volume = queue
                    .iter()
                    .filter(|r| !r.owner.is_agent())
                    .map(|r| r.order.volume)
                    .sum();
                (volume > 0).then_some((price, volume))
            })
            .collect()
    }

    /// Best market price on one side (`Buy` = best bid).
    pub fn best_price(&self, delivery: Timestamp, side: Side) -> Option<Price> {
        let book = self.hours.get(&delivery)?;
        book.side(side)
            .values()
            .flatten()
            .find(|r| !r.owner.is_agent())
            .map(|r| r.order.price)
    }

    /// Whether any market order rests for `delivery`.
    pub fn has_liquidity(&self, delivery: Timestamp) -> bool {
        self.best_price(delivery, Side::Buy).is_some()
            || self.best_price(delivery, Side::Sell).is_some()
    }

    pub fn resting_orders(&self, delivery: Timestamp) -> impl Iterator<Item = &RestingOrder> + '_ {
        self.hours.get(&delivery).into_iter().flat_map(|book| {
            book.bids
                .values()
                .flatten()
                .chain(book.asks.values().flatten())
        })
    }

    pub fn find(&self, id: OrderId) -> Option<&RestingOrder> {
        let location = self.index.get(&id)?;
        self.hours
            .get(&location.delivery)?
            .side(location.side)
            .get(&location.key)?
            .iter()
            .find(|r| r.order.id == id)
    }

    /// Id of the resting version of a family.
    pub fn family_member(&self, initial_id: OrderId) -> Option<OrderId> {
        self.families.get(&initial_id).copied()
    }

    /// Delivery hours with at least one resting order.
    pub fn open_deliveries(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.hours.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn rest(&mut self, resting: RestingOrder) {
        let order = &resting.order;
        let key = level_key(order.side, order.price);
        self.index.insert(
            order.id,
            Location {
                delivery: order.delivery,
                side: order.side,
                key,
                initial_id: order.initial_id,
            },
        );
        self.families.insert(order.initial_id, order.id);
        self.expiries.push(Reverse((order.cancel, order.id)));
        self.hours
            .entry(order.delivery)
            .or_default()
            .side_mut(order.side)
            .entry(key)
            .or_default()
            .push_back(resting);
    }

    /// Unlink and remove a resting order; the logged removal, if any.
    fn take(&mut self, id: OrderId, reason: RemovalReason) -> Option<Removal> {
        let location = self.index.remove(&id)?;
        if self.families.get(&location.initial_id) == Some(&id) {
            self.families.remove(&location.initial_id);
        }
        let book = self.hours.get_mut(&location.delivery)?;
        let levels = book.side_mut(location.side);
        let queue = levels.get_mut(&location.key)?;
        let at = queue.iter().position(|r| r.order.id == id)?;
        let resting = queue.remove(at)?;
        if queue.is_empty() {
            levels.remove(&location.key);
        }
        if book.is_empty() {
            self.hours.remove(&location.delivery);
        }
        self.removal(resting, reason)
    }

    fn forget(&mut self, order: &LimitOrder) {
        self.index.remove(&order.id);
        if self.families.get(&order.initial_id) == Some(&order.id) {
            self.families.remove(&order.initial_id);
        }
    }

    fn removal(&self, resting: RestingOrder, reason: RemovalReason) -> Option<Removal> {
        let accepted_by = resting.accepted_by?;
        if resting.owner.is_agent() || resting.order.volume <= 0 {
            return None;
        }
        Some(Removal {
            time: self.now,
            filled: resting.filled,
            original_volume: resting.original_volume,
            accepted_by,
            reason,
            order: resting.order,
        })
    }
}
