//! Reporting and export: JSON manifest, per-log CSV files, Markdown summary.
//!
//! Logs are stored in fixed-point units; every CSV column is converted to
//! decimals here (EUR/MWh, MWh, EUR, RFC 3339 times). The JSON manifest keeps
//! the raw report and carries a `schema_version`. Newer versions are
//! rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use idsim_core::domain::units::{format_timestamp, money_to_eur, price_to_eur, volume_to_mwh};
use idsim_core::domain::{
    BalancingEntry, DecisionRecord, ExecutedEntry, ForecastEntry, Money, OrderLogEntry, Price,
    PriceRecord, Timestamp, Volume,
};
use idsim_core::engine::VolPricePairs;

use crate::runner::{SimulationReport, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(report: &SimulationReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize SimulationReport to JSON")
}

/// Deserialize a report, rejecting schema versions newer than this build.
pub fn import_json(json: &str) -> Result<SimulationReport> {
    let report: SimulationReport =
        serde_json::from_str(json).context("failed to deserialize SimulationReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV export ─────────────────────────────────────────────────────

fn ts(t: Timestamp) -> String {
    format_timestamp(t)
}

fn eur(p: Price) -> String {
    format!("{:.2}", price_to_eur(p))
}

fn mwh(v: Volume) -> String {
    format!("{:.1}", volume_to_mwh(v))
}

fn cash(m: Money) -> String {
    format!("{:.3}", money_to_eur(m))
}

fn write_rows<I>(header: &[&str], rows: I) -> Result<String>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(&row)?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Accepted or removed book orders.
pub fn export_order_log_csv(entries: &[OrderLogEntry]) -> Result<String> {
    write_rows(
        &[
            "kind",
            "dp_run",
            "time",
            "id",
            "initial_id",
            "start",
            "cancel",
            "delivery",
            "side",
            "price",
            "volume",
            "partial",
            "partial_volume",
        ],
        entries.iter().map(|e| {
            vec![
                format!("{:?}", e.kind).to_lowercase(),
                e.dp_run.to_string(),
                ts(e.time),
                e.id.to_string(),
                e.initial_id.to_string(),
                ts(e.start),
                ts(e.cancel),
                ts(e.delivery),
                e.side.to_string(),
                eur(e.price),
                mwh(e.volume),
                e.partial.to_string(),
                mwh(e.partial_volume),
            ]
        }),
    )
}

pub fn export_executed_csv(entries: &[ExecutedEntry]) -> Result<String> {
    write_rows(
        &[
            "dp_run",
            "time",
            "last_solve_time",
            "delivery",
            "side",
            "volume",
            "reward",
            "reward_incl_deg",
            "final_pos",
            "final_stor",
            "prae_final_pos",
            "prae_final_stor",
            "initial_storage",
        ],
        entries.iter().map(|e| {
            vec![
                e.dp_run.to_string(),
                ts(e.time),
                ts(e.last_solve_time),
                ts(e.delivery),
                e.side.to_string(),
                mwh(e.volume),
                cash(e.reward),
                cash(e.reward_incl_deg),
                mwh(e.final_pos),
                format!("{:.3}", e.final_stor),
                mwh(e.prae_final_pos),
                format!("{:.3}", e.prae_final_stor),
                format!("{:.3}", e.initial_storage),
            ]
        }),
    )
}

pub fn export_forecast_csv(entries: &[ForecastEntry]) -> Result<String> {
    write_rows(
        &[
            "dp_run",
            "time",
            "last_solve_time",
            "delivery",
            "reward",
            "volume",
            "volume_previous",
        ],
        entries.iter().map(|e| {
            vec![
                e.dp_run.to_string(),
                ts(e.time),
                ts(e.last_solve_time),
                ts(e.delivery),
                cash(e.reward),
                mwh(e.volume),
                mwh(e.volume_previous),
            ]
        }),
    )
}

pub fn export_balancing_csv(entries: &[BalancingEntry]) -> Result<String> {
    write_rows(
        &["dp_run", "time", "delivery", "volume", "price", "reward"],
        entries.iter().map(|e| {
            vec![
                e.dp_run.to_string(),
                ts(e.time),
                ts(e.delivery),
                mwh(e.volume),
                eur(e.price),
                cash(e.reward),
            ]
        }),
    )
}

pub fn export_decisions_csv(records: &[DecisionRecord]) -> Result<String> {
    write_rows(
        &["delivery", "storage", "position", "real_reward", "real_reward_no_deg"],
        records.iter().map(|r| {
            vec![
                ts(r.delivery),
                format!("{:.3}", r.storage),
                mwh(r.position),
                cash(r.real_reward),
                cash(r.real_reward_no_deg),
            ]
        }),
    )
}

/// Per-hour trade statistics. Missing ID3/ID1 indices are left empty.
pub fn export_prices_csv(records: &[PriceRecord]) -> Result<String> {
    write_rows(
        &["delivery", "low", "high", "last", "vwap", "id3", "id1", "volume"],
        records.iter().map(|r| {
            vec![
                ts(r.delivery),
                eur(r.low),
                eur(r.high),
                eur(r.last),
                eur(r.vwap),
                r.id3.map(eur).unwrap_or_default(),
                r.id1.map(eur).unwrap_or_default(),
                format!("{:.1}", r.volume as f64 / 10.0),
            ]
        }),
    )
}

/// Flatten sampled depth into one row per (time, delivery, volume).
pub fn export_price_pairs_csv(pairs: &VolPricePairs) -> Result<String> {
    let rows = pairs.iter().flat_map(|(time, hours)| {
        hours.iter().flat_map(move |(delivery, by_volume)| {
            by_volume.iter().map(move |(volume, (total, worst))| {
                vec![ts(*time), ts(*delivery), mwh(*volume), cash(*total), eur(*worst)]
            })
        })
    });
    write_rows(&["time", "delivery", "volume", "cash", "worst_price"], rows)
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Log files written next to the manifest.
pub const CSV_FILES: [&str; 7] = [
    "accepted.csv",
    "removed.csv",
    "executed.csv",
    "forecast.csv",
    "balancing.csv",
    "decisions.csv",
    "prices.csv",
];

/// Save the artifact set for a run under `output_dir/{run id prefix}/`:
/// `manifest.json`, `report.md` and, with `csv`, one file per log.
///
/// Returns the created directory.
pub fn save_artifacts(report: &SimulationReport, output_dir: &Path, csv: bool) -> Result<PathBuf> {
    let run_dir = output_dir.join(report.fingerprint.run_id.short());
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("manifest.json"), export_json(report)?)?;
    std::fs::write(run_dir.join("report.md"), generate_report(report))?;

    if csv {
        let logs = &report.logs;
        let contents = [
            export_order_log_csv(&logs.accepted)?,
            export_order_log_csv(&logs.removed)?,
            export_executed_csv(&logs.executed)?,
            export_forecast_csv(&logs.forecast)?,
            export_balancing_csv(&logs.balancing)?,
            export_decisions_csv(&logs.decisions)?,
            export_prices_csv(&logs.prices)?,
        ];
        for (name, content) in CSV_FILES.iter().zip(contents) {
            let path = run_dir.join(name);
            std::fs::write(&path, content)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
    }

    Ok(run_dir)
}

/// Load a report from an artifact directory's manifest.json.
pub fn load_artifacts(dir: &Path) -> Result<SimulationReport> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

pub fn generate_report(report: &SimulationReport) -> String {
    let params = &report.fingerprint.params;
    let stats = &report.stats;
    let mut md = String::with_capacity(2048);

    md.push_str("# Simulation Report\n\n");

    md.push_str("## Run\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Run ID | `{}` |\n", report.fingerprint.run_id));
    md.push_str(&format!("| Dataset Hash | `{}` |\n", report.fingerprint.dataset_hash));
    md.push_str(&format!(
        "| Window | {} to {} |\n",
        params.start.to_rfc3339(),
        params.end.to_rfc3339()
    ));
    md.push_str(&format!(
        "| Storage | {:.1} MWh, +{:.1} / -{:.1} MW |\n",
        params.storage_max, params.inject_max, params.withdraw_max
    ));
    let missing = report.days.iter().filter(|d| d.missing).count();
    if missing > 0 {
        md.push_str(&format!("| Missing Days | **{missing}** |\n"));
    }
    md.push('\n');

    md.push_str("## Results\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Reward | {:.2} EUR |\n", report.reward_eur));
    md.push_str(&format!("| Final Storage | {:.3} MWh |\n", report.final_storage));
    md.push_str(&format!("| Solves | {} |\n", report.num_solves));
    md.push_str(&format!("| Skipped Solves | {} |\n", stats.skipped_solves));
    md.push_str(&format!("| Infeasible Plans | {} |\n", stats.infeasible_plans));
    md.push_str(&format!("| Orders Replayed | {} |\n", stats.orders_replayed));
    md.push_str(&format!("| Agent Orders | {} |\n", stats.agent_orders));
    md.push_str(&format!("| Executed Trades | {} |\n", stats.executed));
    md.push_str(&format!("| Settled Hours | {} |\n", stats.settled_hours));
    md.push('\n');

    if !report.logs.balancing.is_empty() {
        md.push_str("## Balancing\n\n");
        md.push_str("| Delivery | Volume (MWh) | Price (EUR/MWh) | Reward (EUR) |\n");
        md.push_str("| --- | ---: | ---: | ---: |\n");
        for b in &report.logs.balancing {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                ts(b.delivery),
                mwh(b.volume),
                eur(b.price),
                cash(b.reward)
            ));
        }
        md.push('\n');
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use idsim_core::domain::{OrderId, OrderLogKind, Side};
    use std::collections::BTreeMap;

    const H: Timestamp = 1_609_462_800_000;

    #[test]
    fn order_log_uses_decimal_units() {
        let entry = OrderLogEntry {
            kind: OrderLogKind::Accepted,
            dp_run: 3,
            time: H - 60_000,
            id: OrderId(7),
            initial_id: OrderId(5),
            start: H - 120_000,
            cancel: H,
            delivery: H,
            side: Side::Sell,
            price: 4_250,
            volume: 15,
            partial: true,
            partial_volume: 10,
        };
        let csv = export_order_log_csv(&[entry]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("kind,dp_run,time,id"));
        assert_eq!(
            lines[1],
            "accepted,3,2021-01-01T00:59:00.000Z,7,5,2021-01-01T00:58:00.000Z,\
             2021-01-01T01:00:00.000Z,2021-01-01T01:00:00.000Z,SELL,42.50,1.5,true,1.0"
        );
    }

    #[test]
    fn balancing_cash_in_euros() {
        let entry = BalancingEntry {
            dp_run: 1,
            time: H,
            delivery: H,
            volume: -100,
            price: 2_000,
            reward: -200_000,
        };
        let csv = export_balancing_csv(&[entry]).unwrap();
        assert!(csv.lines().nth(1).unwrap().ends_with(",-10.0,20.00,-200.000"));
    }

    #[test]
    fn missing_indices_are_blank() {
        let record = PriceRecord {
            delivery: H,
            low: 1_000,
            high: 1_000,
            last: 1_000,
            vwap: 1_000,
            id3: None,
            id1: Some(1_000),
            volume: 25,
        };
        let csv = export_prices_csv(&[record]).unwrap();
        assert!(csv.lines().nth(1).unwrap().ends_with(",10.00,10.00,10.00,10.00,,10.00,2.5"));
    }

    #[test]
    fn price_pairs_flatten_per_volume() {
        let mut pairs = VolPricePairs::new();
        let by_volume = BTreeMap::from([(-5, (-10_000, 2_000)), (10, (30_000, 3_000))]);
        pairs.entry(H - 3_600_000).or_default().insert(H, by_volume);

        let csv = export_price_pairs_csv(&pairs).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[2],
            "2021-01-01T00:00:00.000Z,2021-01-01T01:00:00.000Z,1.0,30.000,30.00"
        );
    }
}
