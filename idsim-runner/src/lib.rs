//! idsim runner: orchestration on top of `idsim-core`.
//!
//! This crate provides:
//! - TOML run configuration with `name=value` overrides
//! - Multi-day replay over daily binary order files
//! - JSON, CSV and Markdown export of a run's logs
//! - Parallel parameter sweeps

pub mod config;
pub mod export;
pub mod runner;
pub mod sweep;

pub use config::{ConfigError, DataConfig, OutputConfig, RunConfig};
pub use export::{export_json, import_json, load_artifacts, save_artifacts};
pub use runner::{
    build_simulation, daily_order_file, days_in, run_price_pairs, run_simulation, DayLoad,
    RunError, SimulationReport, SCHEMA_VERSION,
};
pub use sweep::{ParamGrid, ParamSweep, SweepOutcome, SweepResults};
