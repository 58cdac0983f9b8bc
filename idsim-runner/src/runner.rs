//! Run orchestration: load a config's data sources into a `Simulation`,
//! replay them day by day, and collect the result into a report.
//!
//! Two entry points:
//! - `run_simulation()`: full replay with agent, settlement and logs.
//! - `run_price_pairs()`: depth sampling over the same data, no agent.

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use idsim_core::data::{read_orders_csv, ForecastTable, IngestError};
use idsim_core::domain::{SimLogs, Volume};
use idsim_core::engine::VolPricePairs;
use idsim_core::fingerprint::RunFingerprint;
use idsim_core::{SimError, SimStats, Simulation, SimulationParameters};

use crate::config::{ConfigError, RunConfig};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("simulation error: {0}")]
    Sim(#[from] SimError),
    #[error("data error: {0}")]
    Ingest(#[from] IngestError),
    #[error("failed to hash config: {0}")]
    Hash(#[from] serde_json::Error),
}

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// One day of binary order data and how much of it was ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayLoad {
    pub day: NaiveDate,
    pub orders: usize,
    /// The day's file did not exist; the day ran on the book as it was.
    pub missing: bool,
}

/// Complete result of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Hash of the whole run configuration.
    pub config_id: String,
    pub fingerprint: RunFingerprint,
    pub stats: SimStats,
    pub reward_eur: f64,
    pub num_solves: u32,
    pub final_storage: f64,
    #[serde(default)]
    pub days: Vec<DayLoad>,
    pub logs: SimLogs,
}

impl SimulationReport {
    pub fn from_simulation(
        config_id: String,
        sim: &Simulation,
        days: Vec<DayLoad>,
    ) -> Result<Self, SimError> {
        Ok(Self {
            schema_version: SCHEMA_VERSION,
            config_id,
            fingerprint: sim.fingerprint()?,
            stats: sim.stats(),
            reward_eur: sim.return_reward(),
            num_solves: sim.num_solves(),
            final_storage: sim.storage(),
            days,
            logs: sim.logs().clone(),
        })
    }
}

/// `orderbook_YYYY-MM-DD.bin` under `dir`.
pub fn daily_order_file(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(format!("orderbook_{}.bin", day.format("%Y-%m-%d")))
}

/// Every UTC calendar day the window `[start, end)` touches.
pub fn days_in(params: &SimulationParameters) -> Vec<NaiveDate> {
    let first = params.start.date_naive();
    let last = (params.end - Duration::milliseconds(1)).date_naive();
    first
        .iter_days()
        .take_while(|day| *day <= last)
        .collect()
}

/// A simulation with the config's parameters and forecast, but no orders.
pub fn build_simulation(config: &RunConfig) -> Result<Simulation, RunError> {
    let mut sim = Simulation::new(config.simulation.clone());
    if let Some(path) = &config.data.forecast_csv {
        let table = ForecastTable::from_csv_path(path)?;
        info!(path = %path.display(), forecasts = table.len(), "forecast loaded");
        sim.set_forecast(table);
    }
    Ok(sim)
}

/// Replay a config's data through a fresh simulation.
///
/// With a binary directory, each day's file is ingested and run in turn;
/// only the last day finishes the window. A missing day file is skipped
/// with a warning.
pub fn run_simulation(config: &RunConfig) -> Result<SimulationReport, RunError> {
    config.validate()?;
    let config_id = config.run_id()?;
    let mut sim = build_simulation(config)?;
    // The last day's run logs the finish summary.
    let days = replay(config, &mut sim, |sim, is_last| Ok(sim.run(is_last)?))?;
    Ok(SimulationReport::from_simulation(config_id, &sim, days)?)
}

/// Sample book depth every `frequency_secs` over the config's data.
pub fn run_price_pairs(
    config: &RunConfig,
    frequency_secs: i64,
    volumes: &[Volume],
) -> Result<VolPricePairs, RunError> {
    config.validate()?;
    let mut sim = build_simulation(config)?;
    let mut pairs = VolPricePairs::new();
    replay(config, &mut sim, |sim, is_last| {
        for (time, hours) in sim.vol_price_pairs(is_last, frequency_secs, volumes)? {
            pairs.entry(time).or_default().extend(hours);
        }
        Ok(())
    })?;
    Ok(pairs)
}

fn replay<F>(config: &RunConfig, sim: &mut Simulation, mut step: F) -> Result<Vec<DayLoad>, RunError>
where
    F: FnMut(&mut Simulation, bool) -> Result<(), RunError>,
{
    if let Some(dir) = &config.data.orderbook_dir {
        let days = days_in(&config.simulation);
        let mut loads = Vec::with_capacity(days.len());
        for (i, day) in days.iter().enumerate() {
            let path = daily_order_file(dir, *day);
            let load = if path.exists() {
                let orders = sim.add_orders_from_bin(&path)?;
                debug!(day = %day, orders, "day file ingested");
                DayLoad {
                    day: *day,
                    orders,
                    missing: false,
                }
            } else {
                warn!(path = %path.display(), "missing day file, skipping");
                DayLoad {
                    day: *day,
                    orders: 0,
                    missing: true,
                }
            };
            step(sim, i + 1 == days.len())?;
            loads.push(load);
        }
        return Ok(loads);
    }

    if let Some(path) = &config.data.orders_csv {
        let orders = read_orders_csv(path)?;
        info!(path = %path.display(), orders = orders.len(), "orders loaded");
        sim.add_orders(orders)?;
    }
    step(sim, true)?;
    Ok(Vec::new())
}
