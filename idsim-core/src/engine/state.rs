//! Engine configuration, mutable run state, and summary statistics.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::cadence::{cadence_for, SolveCadence, SolveDuration};
use super::dp::{DpConfig, DpPlan, DpSolver};
use super::order_book::OrderBook;
use super::settlement::Settlement;
use super::storage::StorageModel;
use super::translator::{AgentIntent, DecisionTranslator, TranslatorConfig};
use crate::domain::units::{
    hour_ceil, money_to_eur, price_from_eur, rate_per_unit, volume_from_mwh, MS_PER_MINUTE,
};
use crate::domain::{Money, OrderId, Price, Timestamp};
use crate::params::SimulationParameters;

/// Parameters frozen into engine units at the first run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub start: Timestamp,
    pub end: Timestamp,
    pub dp: DpConfig,
    pub translator: TranslatorConfig,
    /// Fee plus degradation per traded unit.
    pub cost_rate: Money,
    pub penalty: Price,
    pub sto_round_dec: u32,
    pub ping_delay: i64,
    pub solve_duration: SolveDuration,
    pub horizon_start_ms: i64,
    pub horizon_end_ms: i64,
    pub use_sliding: bool,
    pub dp_freq_minutes: f64,
}

impl EngineConfig {
    /// Convert validated parameters. Power limits are per one-hour product.
    pub fn from_params(params: &SimulationParameters) -> Self {
        let storage = StorageModel {
            max: params.storage_max,
            loss_in: params.loss_in,
            loss_out: params.loss_out,
        };
        let inject_max = volume_from_mwh(params.inject_max);
        let withdraw_max = volume_from_mwh(params.withdraw_max);
        let fee = rate_per_unit(params.trading_fee);
        let degradation = rate_per_unit(params.lin_deg_cost);
        let penalty = price_from_eur(params.bid_ask_penalty);
        let horizon_end_ms = params.fore_horizon_end * MS_PER_MINUTE;

        Self {
            start: params.start_ms(),
            end: params.end_ms(),
            dp: DpConfig {
                storage,
                num_states: params.num_stor_states as usize,
                inject_max,
                withdraw_max,
                fee,
                degradation,
                penalty: penalty as Money,
            },
            translator: TranslatorConfig {
                horizon_end_ms,
                inject_max,
                withdraw_max,
                penalty,
                check_profit: params.check_profit,
                check_lo_exec: params.check_lo_exec,
            },
            cost_rate: fee + degradation,
            penalty,
            sto_round_dec: params.sto_round_dec,
            ping_delay: params.ping_delay,
            solve_duration: SolveDuration::from_param(params.fixed_solve_time),
            horizon_start_ms: params.fore_horizon_start * MS_PER_MINUTE,
            horizon_end_ms,
            use_sliding: params.use_sliding,
            dp_freq_minutes: params.dp_freq,
        }
    }

    /// Last delivery hour the current solve may plan for.
    pub fn horizon_end(&self, now: Timestamp) -> Timestamp {
        if self.use_sliding {
            now + self.horizon_start_ms
        } else {
            let block = (now - self.start).div_euclid(self.horizon_start_ms);
            self.start + (block + 1) * self.horizon_start_ms
        }
    }
}

/// Event phases; at equal timestamps they run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Phase {
    Settlement,
    Ledger,
    Visibility,
    Decision,
    Solve,
}

/// An agent order waiting out the ping delay.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingOrder {
    pub dp_run: u32,
    pub solve_time: Timestamp,
    pub intent: AgentIntent,
    pub reward: Money,
}

/// A finished solve waiting out its simulated duration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Decision {
    pub dp_run: u32,
    pub solve_time: Timestamp,
    pub plan: DpPlan,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Pending {
    Visible(PendingOrder),
    Decide(Box<Decision>),
    Solve,
}

#[derive(Debug, Clone)]
pub(crate) struct Scheduled {
    pub time: Timestamp,
    pub phase: Phase,
    seq: u64,
    pub event: Pending,
}

impl Scheduled {
    fn key(&self) -> (Timestamp, Phase, u64) {
        (self.time, self.phase, self.seq)
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Mutable state of one simulation, owned by the driver.
#[derive(Debug)]
pub struct EngineState {
    pub config: EngineConfig,
    pub book: OrderBook,
    pub settlement: Settlement,
    pub(crate) solver: DpSolver,
    pub(crate) translator: DecisionTranslator,
    pub(crate) cadence: Box<dyn SolveCadence>,
    queue: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
    pub(crate) next_settlement: Option<Timestamp>,
    /// Completed solves; also the id of the latest run.
    pub runs: u32,
    /// Event-driven cadence: re-solve on the first event at or after this.
    pub(crate) awaiting_event: Option<Timestamp>,
    /// Delivery hour -> initial id of the agent order resting for it.
    pub(crate) agent_orders: BTreeMap<Timestamp, OrderId>,
    pub(crate) counters: Counters,
    started: Instant,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub skipped_solves: u32,
    pub infeasible_plans: u32,
    pub orders_replayed: u64,
    pub agent_orders: u64,
    pub solve_time: Duration,
}

impl EngineState {
    pub fn new(config: EngineConfig) -> Self {
        let cadence = cadence_for(config.dp_freq_minutes, config.start);
        let first_settlement = hour_ceil(config.start);
        let mut state = Self {
            book: OrderBook::new(),
            settlement: Settlement::new(
                config.dp.storage,
                config.cost_rate,
                config.penalty,
                config.sto_round_dec,
                0.0,
            ),
            solver: DpSolver::new(config.dp),
            translator: DecisionTranslator::new(config.translator),
            queue: BinaryHeap::new(),
            seq: 0,
            next_settlement: (first_settlement < config.end).then_some(first_settlement),
            runs: 0,
            awaiting_event: None,
            agent_orders: BTreeMap::new(),
            counters: Counters::default(),
            started: Instant::now(),
            cadence,
            config,
        };
        let first = state.cadence.first_solve(state.config.start);
        if first < state.config.end {
            state.schedule(first, Phase::Solve, Pending::Solve);
        }
        state
    }

    pub(crate) fn schedule(&mut self, time: Timestamp, phase: Phase, event: Pending) {
        self.seq += 1;
        self.queue.push(Reverse(Scheduled {
            time,
            phase,
            seq: self.seq,
            event,
        }));
    }

    /// Earliest internal event: a queued one or the next hour settlement.
    pub(crate) fn next_internal(&self) -> Option<(Timestamp, Phase)> {
        let settlement = self.next_settlement.map(|t| (t, Phase::Settlement));
        let queued = self.queue.peek().map(|Reverse(s)| (s.time, s.phase));
        match (settlement, queued) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub(crate) fn pop_queued(&mut self) -> Option<Scheduled> {
        self.queue.pop().map(|Reverse(s)| s)
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn stats(&self) -> SimStats {
        let logs = self.settlement.logs();
        SimStats {
            dp_runs: self.runs,
            skipped_solves: self.counters.skipped_solves,
            infeasible_plans: self.counters.infeasible_plans,
            orders_replayed: self.counters.orders_replayed,
            agent_orders: self.counters.agent_orders,
            accepted: logs.accepted.len(),
            executed: logs.executed.len(),
            forecast: logs.forecast.len(),
            removed: logs.removed.len(),
            balancing: logs.balancing.len(),
            settled_hours: logs.decisions.len(),
            realized_reward_eur: money_to_eur(self.settlement.realized()),
            final_storage: self.settlement.storage(),
            solve_secs: self.counters.solve_time.as_secs_f64(),
            wall_secs: self.elapsed_secs(),
        }
    }
}

/// Summary counts of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimStats {
    pub dp_runs: u32,
    pub skipped_solves: u32,
    pub infeasible_plans: u32,
    pub orders_replayed: u64,
    pub agent_orders: u64,
    pub accepted: usize,
    pub executed: usize,
    pub forecast: usize,
    pub removed: usize,
    pub balancing: usize,
    pub settled_hours: usize,
    pub realized_reward_eur: f64,
    pub final_storage: f64,
    pub solve_secs: f64,
    pub wall_secs: f64,
}
