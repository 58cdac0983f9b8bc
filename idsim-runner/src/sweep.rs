//! Parameter sweeps over a grid of `name=value` overrides.

use std::collections::HashMap;

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use idsim_core::{ParamError, SimStats, SimulationParameters};

use crate::config::{ConfigError, RunConfig};
use crate::runner::run_simulation;

/// Candidate values per parameter. The grid is their cartesian product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamGrid {
    axes: Vec<(String, Vec<String>)>,
}

impl ParamGrid {
    /// Parse axes of the form `name=v1,v2,...`.
    pub fn parse<S: AsRef<str>>(axes: &[S]) -> Result<Self, ConfigError> {
        let mut grid = Self::default();
        for axis in axes {
            let axis = axis.as_ref();
            let (name, values) = axis
                .split_once('=')
                .ok_or_else(|| ConfigError::Override(axis.to_string()))?;
            let values: Vec<String> = values
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .collect();
            grid = grid.axis(name.trim(), values)?;
        }
        Ok(grid)
    }

    pub fn axis<I, V>(mut self, name: &str, values: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        if !SimulationParameters::NAMES.contains(&name) {
            return Err(ParamError::Unknown(name.to_string()).into());
        }
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(ConfigError::Override(format!("{name}= has no values")));
        }
        self.axes.push((name.to_string(), values));
        Ok(self)
    }

    /// Number of combinations, before invalid ones are dropped.
    pub fn size(&self) -> usize {
        self.axes.iter().map(|(_, values)| values.len()).product()
    }

    /// Every combination applied to `base`, as (overrides, config).
    ///
    /// A value that does not parse is an error. A combination whose fields
    /// contradict each other (say `fore_horizon_start <= fore_horizon_end`)
    /// is skipped.
    pub fn generate(&self, base: &RunConfig) -> Result<Vec<(Vec<String>, RunConfig)>, ConfigError> {
        let mut combos: Vec<Vec<String>> = vec![Vec::new()];
        for (name, values) in &self.axes {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |value| {
                        let mut next = prefix.clone();
                        next.push(format!("{name}={value}"));
                        next
                    })
                })
                .collect();
        }

        let mut configs = Vec::with_capacity(combos.len());
        for overrides in combos {
            let mut config = base.clone();
            match config.apply_overrides(overrides.as_slice()) {
                Ok(()) => configs.push((overrides, config)),
                Err(ConfigError::Params(ParamError::OutOfRange { name, reason }))
                    if !overrides.iter().any(|o| o.starts_with(&format!("{name}="))) =>
                {
                    warn!(?overrides, param = name, %reason, "skipping inconsistent combination");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(configs)
    }
}

/// Summary of one sweep point. Logs are not kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub overrides: Vec<String>,
    pub config_id: String,
    pub run_id: String,
    pub reward_eur: f64,
    pub num_solves: u32,
    pub final_storage: f64,
    pub stats: SimStats,
}

/// Runs every grid point, optionally in parallel.
pub struct ParamSweep {
    parallel: bool,
}

impl Default for ParamSweep {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl ParamSweep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn sweep(&self, grid: &ParamGrid, base: &RunConfig) -> Result<SweepResults> {
        let points = grid.generate(base)?;
        info!(points = points.len(), parallel = self.parallel, "sweep started");

        let run = |(overrides, config): &(Vec<String>, RunConfig)| -> Result<SweepOutcome> {
            let report = run_simulation(config)?;
            Ok(SweepOutcome {
                overrides: overrides.clone(),
                config_id: report.config_id,
                run_id: report.fingerprint.run_id.0,
                reward_eur: report.reward_eur,
                num_solves: report.num_solves,
                final_storage: report.final_storage,
                stats: report.stats,
            })
        };

        let outcomes = if self.parallel {
            points.par_iter().map(run).collect::<Result<Vec<_>>>()?
        } else {
            points.iter().map(run).collect::<Result<Vec<_>>>()?
        };
        Ok(SweepResults::new(outcomes))
    }
}

/// Outcomes in grid order.
#[derive(Debug)]
pub struct SweepResults {
    outcomes: Vec<SweepOutcome>,
    by_run_id: HashMap<String, usize>,
}

impl SweepResults {
    fn new(outcomes: Vec<SweepOutcome>) -> Self {
        let by_run_id = outcomes
            .iter()
            .enumerate()
            .map(|(i, o)| (o.run_id.clone(), i))
            .collect();
        Self {
            outcomes,
            by_run_id,
        }
    }

    pub fn all(&self) -> &[SweepOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, run_id: &str) -> Option<&SweepOutcome> {
        self.by_run_id.get(run_id).map(|&i| &self.outcomes[i])
    }

    /// Highest reward first; ties keep grid order.
    pub fn sorted_by_reward(&self) -> Vec<&SweepOutcome> {
        let mut sorted: Vec<_> = self.outcomes.iter().collect();
        sorted.sort_by(|a, b| b.reward_eur.total_cmp(&a.reward_eur));
        sorted
    }

    pub fn top_n(&self, n: usize) -> Vec<&SweepOutcome> {
        self.sorted_by_reward().into_iter().take(n).collect()
    }

    pub fn best(&self) -> Option<&SweepOutcome> {
        self.sorted_by_reward().into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_axes_and_counts_combinations() {
        let grid = ParamGrid::parse(&["storage_max=5,10", "dp_freq = 0, 15 ,30"]).unwrap();
        assert_eq!(grid.size(), 6);
        assert_eq!(ParamGrid::default().size(), 1);
    }

    #[test]
    fn rejects_unknown_names_and_empty_axes() {
        assert!(matches!(
            ParamGrid::parse(&["capacity=1,2"]),
            Err(ConfigError::Params(ParamError::Unknown(_)))
        ));
        assert!(matches!(
            ParamGrid::parse(&["storage_max="]),
            Err(ConfigError::Override(_))
        ));
        assert!(matches!(
            ParamGrid::parse(&["storage_max"]),
            Err(ConfigError::Override(_))
        ));
    }

    #[test]
    fn generates_in_grid_order() {
        let grid = ParamGrid::parse(&["storage_max=5,10", "dp_freq=0,15"]).unwrap();
        let points = grid.generate(&RunConfig::default()).unwrap();
        let overrides: Vec<_> = points.iter().map(|(o, _)| o.join(" ")).collect();
        assert_eq!(
            overrides,
            vec![
                "storage_max=5 dp_freq=0",
                "storage_max=5 dp_freq=15",
                "storage_max=10 dp_freq=0",
                "storage_max=10 dp_freq=15",
            ]
        );
        assert_eq!(points[3].1.simulation.storage_max, 10.0);
        assert_eq!(points[3].1.simulation.dp_freq, 15.0);
    }

    #[test]
    fn inconsistent_combinations_are_skipped() {
        // Default fore_horizon_start is 600; 700 for the end crosses it.
        let grid = ParamGrid::parse(&["fore_horizon_end=75,700"]).unwrap();
        let points = grid.generate(&RunConfig::default()).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].1.simulation.fore_horizon_end, 75);
    }

    #[test]
    fn unparsable_values_fail_the_sweep() {
        let grid = ParamGrid::parse(&["storage_max=5,big"]).unwrap();
        assert!(grid.generate(&RunConfig::default()).is_err());
    }

    proptest! {
        #[test]
        fn valid_grids_generate_every_combination(
            capacities in prop::collection::vec(1u32..50, 1..5),
            states in prop::collection::vec(2u32..40, 1..4),
        ) {
            let grid = ParamGrid::default()
                .axis("storage_max", capacities.iter().map(u32::to_string))
                .unwrap()
                .axis("num_stor_states", states.iter().map(u32::to_string))
                .unwrap();
            let points = grid.generate(&RunConfig::default()).unwrap();
            prop_assert_eq!(points.len(), grid.size());
            for (i, (_, config)) in points.iter().enumerate() {
                prop_assert_eq!(config.simulation.storage_max, capacities[i / states.len()] as f64);
                prop_assert_eq!(config.simulation.num_stor_states, states[i % states.len()]);
            }
        }
    }
}
