//! idsim CLI: run simulations, prepare order files, sweep parameters.
//!
//! Commands:
//! - `run`: simulate from a TOML config, with `--set name=value` overrides
//! - `convert`: exchange CSV order export to the binary order format
//! - `synth`: write a synthetic day of orders as a binary day file
//! - `sweep`: run a parameter grid, in parallel by default
//! - `price-pairs`: sample book depth into a CSV
//! - `params`: print the default config as TOML

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use idsim_core::data::{write_orders_bin, write_orders_bin_from_csv, SyntheticFlow};
use idsim_core::domain::units::{volume_from_mwh, MS_PER_HOUR};
use idsim_core::domain::Volume;
use idsim_runner::export::export_price_pairs_csv;
use idsim_runner::{
    daily_order_file, run_price_pairs, run_simulation, save_artifacts, ParamGrid, ParamSweep,
    RunConfig, SimulationReport,
};

#[derive(Parser)]
#[command(name = "idsim", about = "idsim: intraday battery trading simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation and save its artifacts.
    Run {
        /// Path to a TOML config file. Defaults apply without one.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Parameter override, `name=value`. Repeatable.
        #[arg(long = "set", value_name = "NAME=VALUE")]
        overrides: Vec<String>,

        /// Output directory; overrides `[output] dir`.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Skip the per-log CSV files.
        #[arg(long, default_value_t = false)]
        no_csv: bool,
    },
    /// Convert an exchange CSV order export to a binary order file.
    Convert {
        input: PathBuf,
        output: PathBuf,
    },
    /// Write one synthetic day of orders as `orderbook_YYYY-MM-DD.bin`.
    Synth {
        /// Day (YYYY-MM-DD).
        #[arg(long)]
        day: String,

        #[arg(long, default_value = "data")]
        out_dir: PathBuf,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        #[arg(long, default_value_t = 200)]
        orders_per_hour: u32,

        /// Hours between market opening and delivery.
        #[arg(long, default_value_t = 6)]
        lead_hours: u32,
    },
    /// Run every combination of a parameter grid.
    Sweep {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Grid axis, `name=v1,v2,...`. Repeatable.
        #[arg(long = "grid", value_name = "NAME=V1,V2", required = true)]
        axes: Vec<String>,

        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Rows to print, best reward first.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Sample book depth over the config's orders.
    PricePairs {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long = "set", value_name = "NAME=VALUE")]
        overrides: Vec<String>,

        /// Seconds between samples.
        #[arg(long, default_value_t = 900)]
        frequency: i64,

        /// Signed volumes in MWh, buys positive.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_value = "-10,-5,5,10")]
        volumes: Vec<f64>,

        /// CSV destination.
        #[arg(long, default_value = "price_pairs.csv")]
        output: PathBuf,
    },
    /// Print the default configuration as TOML.
    Params,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            overrides,
            output_dir,
            no_csv,
        } => run_cmd(config.as_deref(), &overrides, output_dir, no_csv),
        Commands::Convert { input, output } => convert_cmd(&input, &output),
        Commands::Synth {
            day,
            out_dir,
            seed,
            orders_per_hour,
            lead_hours,
        } => synth_cmd(&day, &out_dir, seed, orders_per_hour, lead_hours),
        Commands::Sweep {
            config,
            axes,
            sequential,
            top,
        } => sweep_cmd(config.as_deref(), &axes, sequential, top),
        Commands::PricePairs {
            config,
            overrides,
            frequency,
            volumes,
            output,
        } => price_pairs_cmd(config.as_deref(), &overrides, frequency, &volumes, &output),
        Commands::Params => {
            print!("{}", RunConfig::default().to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>, overrides: &[String]) -> Result<RunConfig> {
    let mut config = match path {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RunConfig::default(),
    };
    config
        .apply_overrides(overrides)
        .context("invalid parameter override")?;
    Ok(config)
}

fn run_cmd(
    config_path: Option<&Path>,
    overrides: &[String],
    output_dir: Option<PathBuf>,
    no_csv: bool,
) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    for line in config.simulation.to_string().lines() {
        info!("{line}");
    }

    let report = run_simulation(&config)?;
    print_summary(&report);

    let output_dir = output_dir.unwrap_or_else(|| config.output.dir.clone());
    let run_dir = save_artifacts(&report, &output_dir, config.output.csv && !no_csv)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn print_summary(report: &SimulationReport) {
    println!();
    println!("Run {}", report.fingerprint.run_id.short());
    println!("  Reward:          {:>12.2} EUR", report.reward_eur);
    println!("  Final storage:   {:>12.3} MWh", report.final_storage);
    println!("  Solves:          {:>12}", report.num_solves);
    println!("  Skipped solves:  {:>12}", report.stats.skipped_solves);
    println!("  Orders replayed: {:>12}", report.stats.orders_replayed);
    println!("  Executed trades: {:>12}", report.stats.executed);
    println!("  Balanced hours:  {:>12}", report.stats.balancing);
    let missing: Vec<String> = report
        .days
        .iter()
        .filter(|d| d.missing)
        .map(|d| d.day.to_string())
        .collect();
    if !missing.is_empty() {
        println!("  Missing days:    {}", missing.join(", "));
    }
}

fn convert_cmd(input: &Path, output: &Path) -> Result<()> {
    let count = write_orders_bin_from_csv(input, output)
        .with_context(|| format!("failed to convert {}", input.display()))?;
    println!("Wrote {count} orders to {}", output.display());
    Ok(())
}

fn synth_cmd(day: &str, out_dir: &Path, seed: u64, orders_per_hour: u32, lead_hours: u32) -> Result<()> {
    let day = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .with_context(|| format!("invalid day '{day}', expected YYYY-MM-DD"))?;
    let midnight = Utc
        .from_utc_datetime(&day.and_hms_opt(0, 0, 0).context("invalid midnight")?)
        .timestamp_millis();
    let lead_hours = lead_hours.clamp(1, 23);

    // Every placement falls inside the day: trading opens `lead_hours`
    // before the first delivery, which is `lead_hours` after midnight.
    let orders = SyntheticFlow {
        seed,
        first_delivery: midnight + lead_hours as i64 * MS_PER_HOUR,
        hours: 24 - lead_hours,
        orders_per_hour,
        lead_hours,
        ..SyntheticFlow::default()
    }
    .generate();

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = daily_order_file(out_dir, day);
    write_orders_bin(&path, &orders)?;
    println!("Wrote {} orders to {}", orders.len(), path.display());
    Ok(())
}

fn sweep_cmd(config_path: Option<&Path>, axes: &[String], sequential: bool, top: usize) -> Result<()> {
    let base = load_config(config_path, &[])?;
    let grid = ParamGrid::parse(axes)?;
    println!("Sweeping {} combinations", grid.size());

    let results = ParamSweep::new()
        .with_parallelism(!sequential)
        .sweep(&grid, &base)?;

    println!();
    println!("{:>4}  {:>12}  {:>7}  {:>8}  overrides", "rank", "reward EUR", "solves", "storage");
    for (rank, outcome) in results.top_n(top).into_iter().enumerate() {
        println!(
            "{:>4}  {:>12.2}  {:>7}  {:>8.3}  {}",
            rank + 1,
            outcome.reward_eur,
            outcome.num_solves,
            outcome.final_storage,
            outcome.overrides.join(" ")
        );
    }
    Ok(())
}

fn price_pairs_cmd(
    config_path: Option<&Path>,
    overrides: &[String],
    frequency: i64,
    volumes_mwh: &[f64],
    output: &Path,
) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    let volumes: Vec<Volume> = volumes_mwh.iter().map(|&v| volume_from_mwh(v)).collect();

    let pairs = run_price_pairs(&config, frequency, &volumes)?;
    std::fs::write(output, export_price_pairs_csv(&pairs)?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {} samples to {}", pairs.len(), output.display());
    Ok(())
}
