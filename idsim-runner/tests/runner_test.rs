//! Integration tests for the runner: day files, config, export, sweeps.
//!
//! Tests:
//! 1. Day-by-day replay matches one batch over the same orders
//! 2. A missing day file is recorded and skipped
//! 3. A TOML file with relative paths drives a run with forecasts
//! 4. Saved artifacts load back; newer schemas are rejected
//! 5. Parallel and sequential sweeps agree
//! 6. Depth sampling over day files stays inside the window
//! 7. A multi-day run logs its finish summary once

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use idsim_core::data::{write_orders_bin, SyntheticFlow};
use idsim_core::domain::units::MS_PER_HOUR;
use idsim_core::domain::LimitOrder;
use idsim_core::Simulation;
use idsim_runner::export::CSV_FILES;
use idsim_runner::{
    daily_order_file, export_json, import_json, load_artifacts, run_price_pairs, run_simulation,
    save_artifacts, ParamGrid, ParamSweep, RunConfig,
};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

fn config(start: &str, end: &str) -> RunConfig {
    let mut config = RunConfig::default();
    config
        .apply_overrides(&[format!("start={start}"), format!("end={end}")])
        .unwrap();
    config
}

fn flow(config: &RunConfig, hours: u32) -> Vec<LimitOrder> {
    SyntheticFlow {
        seed: 5,
        first_delivery: config.simulation.start_ms() + 4 * MS_PER_HOUR,
        hours,
        orders_per_hour: 20,
        lead_hours: 3,
        ..SyntheticFlow::default()
    }
    .generate()
}

/// Split orders into `orderbook_YYYY-MM-DD.bin` files by placement day.
fn write_day_files(dir: &Path, orders: &[LimitOrder]) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut rest = orders;
    while let Some(first) = rest.first() {
        let day = chrono::DateTime::from_timestamp_millis(first.start)
            .unwrap()
            .date_naive();
        let n = rest
            .iter()
            .take_while(|o| {
                chrono::DateTime::from_timestamp_millis(o.start)
                    .unwrap()
                    .date_naive()
                    == day
            })
            .count();
        write_orders_bin(&daily_order_file(dir, day), &rest[..n]).unwrap();
        days.push(day);
        rest = &rest[n..];
    }
    days
}

// ── 1-2. Day files ───────────────────────────────────────────────────

#[test]
fn day_by_day_replay_matches_one_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config("2021-01-01T00:00:00Z", "2021-01-02T12:00:00Z");
    let orders = flow(&config, 30);
    let days = write_day_files(tmp.path(), &orders);
    assert_eq!(days.len(), 2);
    config.data.orderbook_dir = Some(tmp.path().to_path_buf());

    let report = run_simulation(&config).unwrap();
    assert_eq!(report.days.len(), 2);
    assert!(report.days.iter().all(|d| !d.missing));
    assert_eq!(
        report.days.iter().map(|d| d.orders).sum::<usize>(),
        orders.len()
    );

    let mut whole = Simulation::new(config.simulation.clone());
    whole.add_orders(orders).unwrap();
    whole.run(true).unwrap();

    assert_eq!(&report.logs, whole.logs());
    assert_eq!(report.reward_eur, whole.return_reward());
    assert_eq!(report.fingerprint.dataset_hash, whole.dataset_hash());
}

#[test]
fn missing_day_file_is_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config("2021-01-01T00:00:00Z", "2021-01-02T12:00:00Z");
    let orders = flow(&config, 12);
    let days = write_day_files(tmp.path(), &orders);
    assert_eq!(days.len(), 1);
    config.data.orderbook_dir = Some(tmp.path().to_path_buf());

    let report = run_simulation(&config).unwrap();
    assert_eq!(report.days.len(), 2);
    assert!(!report.days[0].missing);
    assert!(report.days[1].missing);
    assert_eq!(report.days[1].orders, 0);
    assert_eq!(report.stats.orders_replayed as usize, orders.len());
}

// ── 3. Config file ───────────────────────────────────────────────────

#[test]
fn toml_file_drives_a_run() {
    let tmp = tempfile::tempdir().unwrap();
    let books = tmp.path().join("books");
    std::fs::create_dir_all(&books).unwrap();
    let base = config("2021-01-01T00:00:00Z", "2021-01-01T12:00:00Z");
    write_day_files(&books, &flow(&base, 6));

    std::fs::write(
        tmp.path().join("forecast.csv"),
        "delivery,placement,buy,sell\n\
         2021-01-01T04:00:00Z,2021-01-01T00:00:00Z,30.0,29.5\n\
         2021-01-01T05:00:00Z,2021-01-01T00:00:00Z,80.0,79.5\n",
    )
    .unwrap();
    let path = tmp.path().join("run.toml");
    std::fs::write(
        &path,
        r#"
[simulation]
start = "2021-01-01T00:00:00Z"
end = "2021-01-01T12:00:00Z"
dp_freq = 30.0

[data]
orderbook_dir = "books"
forecast_csv = "forecast.csv"

[output]
dir = "out"
"#,
    )
    .unwrap();

    let config = RunConfig::from_file(&path).unwrap();
    assert_eq!(config.output.dir, tmp.path().join("out"));
    let report = run_simulation(&config).unwrap();
    assert_eq!(report.days.len(), 1);
    assert!(report.num_solves > 0);
    assert!((0.0..=10.0).contains(&report.final_storage));
}

// ── 4. Artifacts ─────────────────────────────────────────────────────

#[test]
fn artifacts_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config("2021-01-01T00:00:00Z", "2021-01-01T12:00:00Z");
    let books = tmp.path().join("books");
    std::fs::create_dir_all(&books).unwrap();
    write_day_files(&books, &flow(&config, 6));
    config.data.orderbook_dir = Some(books);

    let report = run_simulation(&config).unwrap();
    let dir = save_artifacts(&report, &tmp.path().join("out"), true).unwrap();

    assert!(dir.join("manifest.json").exists());
    assert!(dir.join("report.md").exists());
    for name in CSV_FILES {
        assert!(dir.join(name).exists(), "{name} missing");
    }
    let decisions = std::fs::read_to_string(dir.join("decisions.csv")).unwrap();
    assert_eq!(decisions.lines().count(), report.logs.decisions.len() + 1);

    let loaded = load_artifacts(&dir).unwrap();
    assert_eq!(loaded.logs, report.logs);
    assert_eq!(loaded.fingerprint.run_id, report.fingerprint.run_id);
    assert_eq!(loaded.config_id, report.config_id);
}

#[test]
fn newer_schema_is_rejected() {
    let config = config("2021-01-01T00:00:00Z", "2021-01-01T03:00:00Z");
    let report = run_simulation(&config).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&export_json(&report).unwrap()).unwrap();
    value["schema_version"] = serde_json::json!(99);

    let err = import_json(&value.to_string()).unwrap_err();
    assert!(err.to_string().contains("unsupported schema version"));
}

// ── 5. Sweeps ────────────────────────────────────────────────────────

#[test]
fn parallel_sweep_matches_sequential() {
    let tmp = tempfile::tempdir().unwrap();
    let mut base = config("2021-01-01T00:00:00Z", "2021-01-01T10:00:00Z");
    write_day_files(tmp.path(), &flow(&base, 5));
    base.data.orderbook_dir = Some(tmp.path().to_path_buf());

    let grid = ParamGrid::parse(&["storage_max=5,10", "dp_freq=0,30"]).unwrap();
    let parallel = ParamSweep::new().sweep(&grid, &base).unwrap();
    let sequential = ParamSweep::new()
        .with_parallelism(false)
        .sweep(&grid, &base)
        .unwrap();

    assert_eq!(parallel.len(), 4);
    for (p, s) in parallel.all().iter().zip(sequential.all()) {
        assert_eq!(p.overrides, s.overrides);
        assert_eq!(p.run_id, s.run_id);
        assert_eq!(p.reward_eur, s.reward_eur);
    }
    let best = parallel.best().unwrap();
    assert!(parallel.all().iter().all(|o| o.reward_eur <= best.reward_eur));
    assert!(parallel.get(&best.run_id).is_some());
}

// ── 6. Depth sampling ────────────────────────────────────────────────

#[test]
fn price_pairs_stay_inside_the_window() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config("2021-01-01T00:00:00Z", "2021-01-01T10:00:00Z");
    write_day_files(tmp.path(), &flow(&config, 5));
    config.data.orderbook_dir = Some(tmp.path().to_path_buf());

    let pairs = run_price_pairs(&config, 900, &[-10, 10]).unwrap();
    assert!(!pairs.is_empty());

    let (start, end) = (config.simulation.start_ms(), config.simulation.end_ms());
    for (time, hours) in &pairs {
        assert!((start..end).contains(time));
        assert_eq!((time - start) % 900_000, 0);
        for (delivery, by_volume) in hours {
            assert!(delivery > time);
            assert!(by_volume.keys().all(|v| *v == -10 || *v == 10));
        }
    }
}

// ── 7. Logging ───────────────────────────────────────────────────────

/// Counts events whose message is `message`.
struct MessageCounter {
    message: &'static str,
    seen: Arc<AtomicUsize>,
}

impl<S: tracing::Subscriber> Layer<S> for MessageCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Matches<'a>(&'a str, bool);
        impl tracing::field::Visit for Matches<'_> {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" && format!("{value:?}") == self.0 {
                    self.1 = true;
                }
            }
        }
        let mut visitor = Matches(self.message, false);
        event.record(&mut visitor);
        if visitor.1 {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn finish_summary_is_logged_once() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config("2021-01-01T00:00:00Z", "2021-01-02T12:00:00Z");
    write_day_files(tmp.path(), &flow(&config, 30));
    config.data.orderbook_dir = Some(tmp.path().to_path_buf());

    let seen = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(MessageCounter {
        message: "simulation finished",
        seen: Arc::clone(&seen),
    });
    let report = tracing::subscriber::with_default(subscriber, || run_simulation(&config).unwrap());

    assert_eq!(report.days.len(), 2);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
