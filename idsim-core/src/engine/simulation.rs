//! The simulation facade: ingest orders and forecasts, run, report.
//!
//! `Simulation` owns every piece of run state. Only `params` is public, and
//! it is frozen into an `EngineConfig` at the first `run`.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use super::order_book::{OrderBook, OrderBookError, Owner};
use super::pricing::Ladder;
use super::state::{EngineConfig, EngineState, SimStats};
use crate::data::{read_orders_bin, ForecastRow, ForecastTable, IngestError, OrderColumns, OrderLedger};
use crate::domain::units::{money_to_eur, MS_PER_SECOND};
use crate::domain::{DatasetHash, LimitOrder, Money, Price, SimLogs, Side, Timestamp, Volume};
use crate::fingerprint::RunFingerprint;
use crate::params::{ParamError, SimulationParameters};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid parameters: {0}")]
    Params(#[from] ParamError),

    #[error("order book: {0}")]
    Book(#[from] OrderBookError),

    #[error("ingestion: {0}")]
    Ingest(#[from] IngestError),

    #[error("fingerprint: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

/// Sampled book depth: time -> delivery hour -> signed volume ->
/// (cash for the full volume, worst price touched).
pub type VolPricePairs = BTreeMap<Timestamp, BTreeMap<Timestamp, BTreeMap<Volume, (Money, Price)>>>;

static EMPTY_LOGS: SimLogs = SimLogs {
    accepted: Vec::new(),
    executed: Vec::new(),
    forecast: Vec::new(),
    removed: Vec::new(),
    balancing: Vec::new(),
    decisions: Vec::new(),
    prices: Vec::new(),
};

#[derive(Debug)]
struct Sampler {
    book: OrderBook,
    next_sample: Timestamp,
}

#[derive(Debug, Default)]
pub struct Simulation {
    pub params: SimulationParameters,
    ledger: OrderLedger,
    forecast: ForecastTable,
    engine: Option<EngineState>,
    frozen: Option<SimulationParameters>,
    sampler: Option<Sampler>,
}

impl Simulation {
    pub fn new(params: SimulationParameters) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    // ── Ingestion ──────────────────────────────────────────────────────

    /// Queue a batch of orders. All-or-nothing.
    pub fn add_orders(&mut self, orders: Vec<LimitOrder>) -> Result<usize, SimError> {
        Ok(self.ledger.extend(orders)?)
    }

    pub fn add_orders_from_columns(&mut self, columns: &OrderColumns) -> Result<usize, SimError> {
        self.add_orders(columns.to_orders()?)
    }

    pub fn add_orders_from_bin(&mut self, path: &Path) -> Result<usize, SimError> {
        self.add_orders(read_orders_bin(path)?)
    }

    pub fn load_forecast(&mut self, rows: &[ForecastRow]) -> Result<(), SimError> {
        Ok(self.forecast.extend(rows)?)
    }

    pub fn set_forecast(&mut self, table: ForecastTable) {
        self.forecast = table;
    }

    pub fn forecast(&self) -> &ForecastTable {
        &self.forecast
    }

    /// Orders still waiting in the ledger.
    pub fn queued_orders(&self) -> usize {
        self.ledger.len()
    }

    pub fn dataset_hash(&self) -> DatasetHash {
        self.ledger.dataset_hash()
    }

    // ── Running ────────────────────────────────────────────────────────

    /// Replay every queued order. With `is_last`, also finish every solve
    /// and settlement up to the end of the window.
    pub fn run(&mut self, is_last: bool) -> Result<(), SimError> {
        let engine = match &mut self.engine {
            Some(engine) => {
                if self.frozen.as_ref() != Some(&self.params) {
                    warn!("parameter changes after the first run are ignored");
                }
                engine
            }
            slot @ None => {
                self.params.validate()?;
                let config = EngineConfig::from_params(&self.params);
                self.frozen = Some(self.params.clone());
                let engine = EngineState::new(config);
                info!(
                    start = %self.params.start,
                    end = %self.params.end,
                    cadence = engine.cadence.name(),
                    "simulation started"
                );
                slot.insert(engine)
            }
        };
        engine.run_events(&mut self.ledger, &self.forecast, is_last)?;
        if is_last {
            self.print_sim_finish_stats();
        }
        Ok(())
    }

    // ── Results ────────────────────────────────────────────────────────

    /// Realized reward so far, in EUR.
    pub fn return_reward(&self) -> f64 {
        self.engine
            .as_ref()
            .map_or(0.0, |e| money_to_eur(e.settlement.realized()))
    }

    pub fn num_solves(&self) -> u32 {
        self.engine.as_ref().map_or(0, |e| e.runs)
    }

    pub fn storage(&self) -> f64 {
        self.engine.as_ref().map_or(0.0, |e| e.settlement.storage())
    }

    pub fn logs(&self) -> &SimLogs {
        self.engine
            .as_ref()
            .map_or(&EMPTY_LOGS, |e| e.settlement.logs())
    }

    pub fn stats(&self) -> SimStats {
        self.engine
            .as_ref()
            .map(EngineState::stats)
            .unwrap_or_default()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.engine.as_ref().map_or(0.0, EngineState::elapsed_secs)
    }

    pub fn fingerprint(&self) -> Result<RunFingerprint, SimError> {
        let params = self.frozen.as_ref().unwrap_or(&self.params);
        Ok(RunFingerprint::new(params, self.dataset_hash())?)
    }

    pub fn print_sim_finish_stats(&self) {
        let stats = self.stats();
        info!(
            dp_runs = stats.dp_runs,
            skipped = stats.skipped_solves,
            infeasible = stats.infeasible_plans,
            orders = stats.orders_replayed,
            agent_orders = stats.agent_orders,
            accepted = stats.accepted,
            executed = stats.executed,
            removed = stats.removed,
            balancing = stats.balancing,
            reward_eur = stats.realized_reward_eur,
            storage = stats.final_storage,
            solve_secs = stats.solve_secs,
            "simulation finished"
        );
    }

    pub fn print_parameters(&self) {
        for line in self.params.to_string().lines() {
            info!("{line}");
        }
    }

    // ── Depth sampling ─────────────────────────────────────────────────

    /// Replay the queued ledger into a separate book and sample it every
    /// `frequency_secs`: for each open delivery hour and each signed volume
    /// (buys walk asks, sells walk bids) record the cash for the full volume
    /// and the worst price touched. Volumes deeper than the book are left out.
    ///
    /// Consumes the queued orders, like `run`.
    pub fn vol_price_pairs(
        &mut self,
        is_last: bool,
        frequency_secs: i64,
        volumes: &[Volume],
    ) -> Result<VolPricePairs, SimError> {
        if frequency_secs <= 0 {
            return Err(ParamError::OutOfRange {
                name: "frequency",
                reason: format!("{frequency_secs} s must be positive"),
            }
            .into());
        }
        let interval = frequency_secs * MS_PER_SECOND;
        let start = self.params.start_ms();
        let end = self.params.end_ms();
        let sampler = self.sampler.get_or_insert_with(|| Sampler {
            book: OrderBook::new(),
            next_sample: start,
        });

        let mut pairs = VolPricePairs::new();
        while let Some(next) = self.ledger.peek().map(|o| o.start) {
            while sampler.next_sample < next && sampler.next_sample < end {
                sample(sampler, volumes, &mut pairs)?;
                sampler.next_sample += interval;
            }
            let Some(order) = self.ledger.pop() else {
                break;
            };
            if order.start >= end || order.delivery <= order.start {
                continue;
            }
            sampler.book.submit(order, Owner::Market)?;
        }
        if is_last {
            while sampler.next_sample < end {
                sample(sampler, volumes, &mut pairs)?;
                sampler.next_sample += interval;
            }
        }
        Ok(pairs)
    }
}

fn sample(sampler: &mut Sampler, volumes: &[Volume], pairs: &mut VolPricePairs) -> Result<(), SimError> {
    let now = sampler.next_sample;
    sampler.book.advance_to(now)?;
    let hours: Vec<Timestamp> = sampler.book.open_deliveries().collect();
    for hour in hours {
        if hour <= now {
            sampler.book.close_delivery(hour);
            continue;
        }
        let asks = Ladder::new(sampler.book.ladder(hour, Side::Sell));
        let bids = Ladder::new(sampler.book.ladder(hour, Side::Buy));
        let mut by_volume = BTreeMap::new();
        for &volume in volumes {
            let ladder = if volume > 0 { &asks } else { &bids };
            if volume == 0 {
                continue;
            }
            if let Some(sweep) = ladder.sweep(volume.abs()) {
                if let Some(worst) = sweep.worst {
                    by_volume.insert(volume, (sweep.cash, worst));
                }
            }
        }
        if !by_volume.is_empty() {
            pairs.entry(now).or_default().insert(hour, by_volume);
        }
    }
    Ok(())
}
