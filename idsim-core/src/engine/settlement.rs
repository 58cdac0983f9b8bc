//! Positions, storage and the log collections.
//!
//! Settlement owns everything the run reports: per-hour executed and
//! committed positions, the physical storage level, the trade tape, and the
//! logs. Each optimizer run leaves at most one forecast or executed entry
//! per delivery hour. At each delivery hour's close the committed position is
//! delivered physically and any gap to what was executed is settled as a
//! balancing trade.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use super::order_book::{Removal, Trade};
use super::storage::{round_level, StorageModel};
use crate::data::ForecastPrice;
use crate::domain::units::{cash, MS_PER_HOUR};
use crate::domain::{
    BalancingEntry, DecisionRecord, ExecutedEntry, ForecastEntry, LimitOrder, Money, OrderLogEntry,
    Price, PriceRecord, Side, SimLogs, Timestamp, Volume,
};

/// What the agent holds for one delivery hour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HourPosition {
    pub executed: Volume,
    pub committed: Volume,
    /// Cash of executed trades.
    pub reward: Money,
    /// Cash net of fee and degradation.
    pub reward_incl_deg: Money,
    last_forecast: Option<Volume>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Print {
    time: Timestamp,
    price: Price,
    volume: Volume,
}

/// Where a run's single log entry for an hour lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEntry {
    Forecast(usize),
    Executed(usize),
}

/// Best market quotes for an hour, taken before its book closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HourQuotes {
    pub bid: Option<Price>,
    pub ask: Option<Price>,
}

impl HourQuotes {
    /// Mid of a two-sided book, else the side a forced trade of
    /// `imbalance` would hit, else whatever side quotes.
    fn reference(&self, imbalance: Volume) -> Option<Price> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some(((bid as f64 + ask as f64) / 2.0).round() as Price),
            (bid, ask) if imbalance < 0 => ask.or(bid),
            (bid, ask) => bid.or(ask),
        }
    }
}

/// One agent fill, ready to be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    pub dp_run: u32,
    pub time: Timestamp,
    pub last_solve_time: Timestamp,
    pub delivery: Timestamp,
    /// Signed, buys positive.
    pub volume: Volume,
    /// Signed cash, buys negative.
    pub cash: Money,
}

impl Execution {
    /// The agent's side of `trade`, or `None` if the agent is not in it.
    pub fn from_trade(trade: &Trade, dp_run: u32, last_solve_time: Timestamp) -> Option<Self> {
        let (agent, _) = trade.agent_fill()?;
        let volume = agent.order.side.sign() * trade.volume;
        Some(Self {
            dp_run,
            time: trade.time,
            last_solve_time,
            delivery: trade.delivery,
            volume,
            cash: -cash(trade.price, volume),
        })
    }

    /// Fold another fill of the same order into this one.
    pub fn absorb(&mut self, other: &Execution) {
        self.volume += other.volume;
        self.cash += other.cash;
    }
}

#[derive(Debug, Clone)]
pub struct Settlement {
    model: StorageModel,
    /// Fee plus degradation, per traded unit.
    cost_rate: Money,
    penalty: Price,
    round_decimals: u32,
    initial_storage: f64,
    storage: f64,
    positions: BTreeMap<Timestamp, HourPosition>,
    run_entries: HashMap<(u32, Timestamp), RunEntry>,
    tape: BTreeMap<Timestamp, Vec<Print>>,
    realized: Money,
    logs: SimLogs,
}

impl Settlement {
    pub fn new(
        model: StorageModel,
        cost_rate: Money,
        penalty: Price,
        round_decimals: u32,
        initial_storage: f64,
    ) -> Self {
        let storage = model.clamp(initial_storage);
        Self {
            model,
            cost_rate,
            penalty,
            round_decimals,
            initial_storage: storage,
            storage,
            positions: BTreeMap::new(),
            run_entries: HashMap::new(),
            tape: BTreeMap::new(),
            realized: 0,
            logs: SimLogs::default(),
        }
    }

    pub fn storage(&self) -> f64 {
        self.storage
    }

    /// Realized reward so far (money units).
    pub fn realized(&self) -> Money {
        self.realized
    }

    pub fn position(&self, delivery: Timestamp) -> HourPosition {
        self.positions.get(&delivery).copied().unwrap_or_default()
    }

    pub fn logs(&self) -> &SimLogs {
        &self.logs
    }

    pub fn into_logs(self) -> SimLogs {
        self.logs
    }

    /// Every trade in the book, for hour statistics and balancing prices.
    pub fn record_print(&mut self, trade: &Trade) {
        self.tape.entry(trade.delivery).or_default().push(Print {
            time: trade.time,
            price: trade.price,
            volume: trade.volume,
        });
    }

    /// Latest recommendation for an hour; the battery follows it at close.
    pub fn commit(&mut self, delivery: Timestamp, target: Volume) {
        self.positions.entry(delivery).or_default().committed = target;
    }

    /// Log a recommendation that did not trade, and commit it. A second
    /// recommendation from the same run overwrites the first; one from a
    /// run that already traded the hour only commits.
    pub fn record_forecast(
        &mut self,
        dp_run: u32,
        time: Timestamp,
        last_solve_time: Timestamp,
        delivery: Timestamp,
        volume: Volume,
        reward: Money,
    ) {
        let position = self.positions.entry(delivery).or_default();
        position.committed = volume;
        let key = (dp_run, delivery);
        match self.run_entries.get(&key).copied() {
            Some(RunEntry::Executed(_)) => {}
            Some(RunEntry::Forecast(i)) => {
                let entry = &mut self.logs.forecast[i];
                entry.time = time;
                entry.last_solve_time = last_solve_time;
                entry.reward = reward;
                entry.volume = volume;
                position.last_forecast = Some(volume);
            }
            None => {
                let previous = position.last_forecast.replace(volume).unwrap_or(0);
                self.run_entries
                    .insert(key, RunEntry::Forecast(self.logs.forecast.len()));
                self.logs.forecast.push(ForecastEntry {
                    dp_run,
                    time,
                    last_solve_time,
                    delivery,
                    reward,
                    volume,
                    volume_previous: previous,
                });
            }
        }
    }

    pub fn record_accepted(&mut self, dp_run: u32, time: Timestamp, order: &LimitOrder, taken: Volume) {
        self.logs
            .accepted
            .push(OrderLogEntry::accepted(dp_run, time, order, taken));
    }

    pub fn record_removal(&mut self, removal: &Removal) {
        trace!(id = %removal.order.id, remainder = removal.order.volume, "accepted order removed");
        self.logs.removed.push(OrderLogEntry::removed(
            removal.accepted_by,
            removal.time,
            &removal.order,
            removal.filled,
        ));
    }

    /// Book an agent execution and log it. Fills from a run that already
    /// traded the hour fold into its entry; a first fill replaces the run's
    /// forecast entry for the hour.
    pub fn record_execution(&mut self, exec: &Execution) {
        let prae_stor = self.projected_storage(exec.delivery);
        let position = self.positions.entry(exec.delivery).or_default();
        let prae_pos = position.executed;
        let net = exec.cash - self.cost_rate * exec.volume.abs() as Money;
        position.executed += exec.volume;
        position.reward += exec.cash;
        position.reward_incl_deg += net;
        let final_pos = position.executed;
        let final_stor = self.projected_storage(exec.delivery);

        let Some(side) = Side::of_signed(exec.volume) else {
            return;
        };
        trace!(delivery = exec.delivery, volume = exec.volume, cash = exec.cash, "agent execution");
        let key = (exec.dp_run, exec.delivery);
        match self.run_entries.get(&key).copied() {
            Some(RunEntry::Executed(i)) => {
                let entry = &mut self.logs.executed[i];
                entry.time = exec.time;
                entry.reward += exec.cash;
                entry.reward_incl_deg += net;
                entry.volume += exec.volume;
                entry.side = Side::of_signed(entry.volume).unwrap_or(side);
                entry.final_pos = final_pos;
                entry.final_stor = final_stor;
                return;
            }
            Some(RunEntry::Forecast(i)) => self.drop_forecast_entry(i),
            None => {}
        }
        self.run_entries
            .insert(key, RunEntry::Executed(self.logs.executed.len()));
        self.logs.executed.push(ExecutedEntry {
            dp_run: exec.dp_run,
            time: exec.time,
            last_solve_time: exec.last_solve_time,
            delivery: exec.delivery,
            reward: exec.cash,
            reward_incl_deg: net,
            volume: exec.volume,
            side,
            final_pos,
            final_stor,
            prae_final_pos: prae_pos,
            prae_final_stor: prae_stor,
            initial_storage: self.initial_storage,
        });
    }

    fn drop_forecast_entry(&mut self, index: usize) {
        self.logs.forecast.remove(index);
        for entry in self.run_entries.values_mut() {
            if let RunEntry::Forecast(i) = entry {
                if *i > index {
                    *i -= 1;
                }
            }
        }
    }

    /// Deliver the hour: follow the committed position, settle the gap to
    /// executed volume at a penalized reference price, advance storage.
    ///
    /// The reference is the forecast mid, else the hour's traded VWAP, else
    /// the closing quotes, else zero.
    pub fn settle_hour(
        &mut self,
        delivery: Timestamp,
        time: Timestamp,
        dp_run: u32,
        forecast: Option<ForecastPrice>,
        quotes: HourQuotes,
    ) {
        let position = self.positions.remove(&delivery).unwrap_or_default();
        self.run_entries.retain(|&(_, hour), _| hour != delivery);
        let physical = self.model.fit(self.storage, position.committed);
        let imbalance = position.executed - physical;

        let mut balancing_reward = 0;
        if imbalance != 0 {
            let reference = forecast
                .map(|f| f.mid())
                .or_else(|| self.vwap(delivery))
                .or_else(|| quotes.reference(imbalance))
                .unwrap_or(0);
            // Negative imbalance is a forced purchase.
            let price = if imbalance < 0 {
                reference.saturating_add(self.penalty)
            } else {
                reference.saturating_sub(self.penalty)
            };
            balancing_reward = cash(price, imbalance);
            self.logs.balancing.push(BalancingEntry {
                dp_run,
                time,
                delivery,
                volume: imbalance,
                price,
                reward: balancing_reward,
            });
        }

        let level = self.storage + self.model.energy(physical);
        self.storage = self
            .model
            .clamp(round_level(self.model.clamp(level), self.round_decimals));

        let real_reward = position.reward_incl_deg + balancing_reward;
        self.realized += real_reward;
        self.logs.decisions.push(DecisionRecord {
            delivery,
            storage: self.storage,
            position: physical,
            real_reward,
            real_reward_no_deg: position.reward + balancing_reward,
        });
        if let Some(record) = self.price_record(delivery) {
            self.logs.prices.push(record);
        }
        self.tape.remove(&delivery);
        debug!(
            delivery,
            executed = position.executed,
            physical,
            imbalance,
            storage = self.storage,
            "hour settled"
        );
    }

    /// Storage after every unsettled hour up to `delivery` trades its
    /// executed volume.
    fn projected_storage(&self, delivery: Timestamp) -> f64 {
        let level = self
            .positions
            .range(..=delivery)
            .fold(self.storage, |level, (_, p)| level + self.model.energy(p.executed));
        self.model.clamp(level)
    }

    fn vwap(&self, delivery: Timestamp) -> Option<Price> {
        vwap(self.tape.get(&delivery)?.iter())
    }

    fn price_record(&self, delivery: Timestamp) -> Option<PriceRecord> {
        let prints = self.tape.get(&delivery)?;
        let last = prints.last()?;
        let within = |hours: i64| {
            vwap(
                prints
                    .iter()
                    .filter(move |p| p.time >= delivery - hours * MS_PER_HOUR),
            )
        };
        Some(PriceRecord {
            delivery,
            low: prints.iter().map(|p| p.price).min()?,
            high: prints.iter().map(|p| p.price).max()?,
            last: last.price,
            vwap: vwap(prints.iter())?,
            id3: within(3),
            id1: within(1),
            volume: prints.iter().map(|p| p.volume as i64).sum(),
        })
    }
}

fn vwap<'a>(prints: impl Iterator<Item = &'a Print>) -> Option<Price> {
    let (notional, volume) = prints.fold((0i64, 0i64), |(n, v), p| {
        (n + cash(p.price, p.volume), v + p.volume as i64)
    });
    (volume > 0).then(|| (notional as f64 / volume as f64).round() as Price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderId;
    use crate::engine::order_book::{FillSide, Owner};

    const H: Timestamp = 10 * MS_PER_HOUR;

    fn settlement() -> Settlement {
        Settlement::new(
            StorageModel {
                max: 10.0,
                loss_in: 1.0,
                loss_out: 1.0,
            },
            10,
            100,
            3,
            0.0,
        )
    }

    fn order(side: Side, volume: Volume) -> LimitOrder {
        LimitOrder {
            id: OrderId(1),
            initial_id: OrderId(1),
            start: 0,
            cancel: H,
            delivery: H,
            side,
            price: 5_000,
            volume,
        }
    }

    fn trade(time: Timestamp, price: Price, volume: Volume, agent_buys: bool) -> Trade {
        let agent = Owner::Agent {
            dp_run: 1,
            solve_time: 0,
        };
        let (agent_side, market_side) = if agent_buys {
            (Side::Buy, Side::Sell)
        } else {
            (Side::Sell, Side::Buy)
        };
        Trade {
            time,
            delivery: H,
            price,
            volume,
            resting: FillSide {
                order: order(market_side, volume),
                owner: Owner::Market,
            },
            incoming: FillSide {
                order: order(agent_side, volume),
                owner: agent,
            },
        }
    }

    #[test]
    fn execution_books_cash_and_costs() {
        let mut s = settlement();
        let exec = Execution::from_trade(&trade(5, 5_000, 20, true), 1, 0).unwrap();
        assert_eq!(exec.volume, 20);
        assert_eq!(exec.cash, -100_000);
        s.record_execution(&exec);

        let entry = &s.logs().executed[0];
        assert_eq!(entry.reward, -100_000);
        assert_eq!(entry.reward_incl_deg, -100_200);
        assert_eq!((entry.prae_final_pos, entry.final_pos), (0, 20));
        assert!((entry.final_stor - 2.0).abs() < 1e-9);
        assert_eq!(s.position(H).executed, 20);
    }

    #[test]
    fn unexecuted_commitment_is_balanced_at_close() {
        let mut s = settlement();
        s.record_forecast(1, 0, 0, H, 50, 0);
        s.record_forecast(2, 10, 10, H, 40, 0);
        assert_eq!(s.logs().forecast[1].volume_previous, 50);

        let forecast = ForecastPrice {
            buy: 6_000,
            sell: 4_000,
        };
        s.settle_hour(H, H, 2, Some(forecast), HourQuotes::default());
        let bal = &s.logs().balancing[0];
        assert_eq!(bal.volume, -40);
        assert_eq!(bal.settled_volume(), 40);
        assert_eq!(bal.price, 5_100);
        assert_eq!(bal.reward, -204_000);
        assert!((s.storage() - 4.0).abs() < 1e-9);
        assert_eq!(s.logs().decisions[0].position, 40);
        assert_eq!(s.realized(), -204_000);
    }

    #[test]
    fn matched_position_needs_no_balancing() {
        let mut s = settlement();
        s.commit(H, -20);
        s.record_print(&trade(H - 2 * MS_PER_HOUR, 4_000, 10, true));
        let exec = Execution::from_trade(&trade(H - 30 * 60_000, 5_000, 20, false), 1, 0).unwrap();
        s.record_print(&trade(H - 30 * 60_000, 5_000, 20, false));

        // Start with energy to sell.
        s.storage = 5.0;
        s.record_execution(&exec);
        s.settle_hour(H, H, 1, None, HourQuotes::default());
        assert!(s.logs().balancing.is_empty());
        assert!((s.storage() - 3.0).abs() < 1e-9);

        let record = &s.logs().prices[0];
        assert_eq!((record.low, record.high, record.last), (4_000, 5_000, 5_000));
        assert_eq!(record.vwap, 4_667);
        assert_eq!(record.id3, Some(4_667));
        assert_eq!(record.id1, Some(5_000));
        assert_eq!(record.volume, 30);
        assert_eq!(s.realized(), 100_000 - 200);
    }

    #[test]
    fn vwap_is_the_fallback_reference() {
        let mut s = settlement();
        s.commit(H, 10);
        s.record_print(&trade(H - 1, 4_500, 10, true));
        s.settle_hour(H, H, 1, None, HourQuotes::default());
        let bal = &s.logs().balancing[0];
        assert_eq!(bal.volume, -10);
        assert_eq!(bal.price, 4_600);
    }

    #[test]
    fn passive_fills_fold_into_the_run_entry() {
        let mut s = settlement();
        s.record_forecast(1, 0, 0, H, 20, 7);
        s.record_forecast(2, 50, 50, H, 20, 3);
        s.record_forecast(1, 60, 0, H, 20, 9);
        assert_eq!(s.logs().forecast.len(), 2);
        assert_eq!(s.logs().forecast[0].reward, 9);

        // Two passive fills of run 1's resting bid.
        s.record_execution(&Execution::from_trade(&trade(100, 5_000, 10, true), 1, 0).unwrap());
        s.record_execution(&Execution::from_trade(&trade(200, 4_800, 10, true), 1, 0).unwrap());
        s.record_forecast(1, 300, 0, H, 20, 0);

        let logs = s.logs();
        assert_eq!(logs.forecast.len(), 1);
        assert_eq!(logs.forecast[0].dp_run, 2);
        assert_eq!(logs.executed.len(), 1);
        let entry = &logs.executed[0];
        assert_eq!((entry.dp_run, entry.time, entry.volume), (1, 200, 20));
        assert_eq!(entry.reward, -98_000);
        assert_eq!(entry.reward_incl_deg, -98_200);
        assert_eq!((entry.prae_final_pos, entry.final_pos), (0, 20));

        // A fill for run 2 replaces its forecast entry too.
        s.record_execution(&Execution::from_trade(&trade(400, 5_000, 10, false), 2, 50).unwrap());
        assert!(s.logs().forecast.is_empty());
        assert_eq!(s.logs().executed.len(), 2);
    }

    #[test]
    fn closing_quotes_back_up_forecast_and_trades() {
        let balance = |forecast: Option<ForecastPrice>, quotes: HourQuotes| {
            let mut s = settlement();
            s.commit(H, 10);
            s.settle_hour(H, H, 1, forecast, quotes);
            s.logs().balancing[0].price
        };
        let two_sided = HourQuotes {
            bid: Some(4_000),
            ask: Some(4_401),
        };
        let forecast = ForecastPrice {
            buy: 3_000,
            sell: 3_000,
        };
        // Forced purchase: reference plus the 100 penalty.
        assert_eq!(balance(Some(forecast), two_sided), 3_100);
        assert_eq!(balance(None, two_sided), 4_301);
        assert_eq!(balance(None, HourQuotes { bid: Some(4_000), ask: None }), 4_100);
        assert_eq!(balance(None, HourQuotes::default()), 100);
    }

    #[test]
    fn one_sided_quotes_prefer_the_side_hit() {
        let quotes = HourQuotes {
            bid: None,
            ask: Some(5_000),
        };
        assert_eq!(quotes.reference(-10), Some(5_000));
        assert_eq!(quotes.reference(10), Some(5_000));
        let both = HourQuotes {
            bid: Some(4_000),
            ask: Some(5_000),
        };
        assert_eq!(both.reference(10), Some(4_500));
    }
}
