//! Backward-induction dispatch optimizer over a discretized storage grid.
//!
//! Each delivery hour in the horizon is a stage. A stage's decision is the
//! target position `x` for that hour (positive = buy/charge); the trade is
//! `x - executed`. Values are integer money, so equal-value actions tie
//! exactly and resolve toward the smallest trade, then the lowest next
//! bucket.

use tracing::warn;

use super::pricing::{HourPricing, PriceSource};
use super::storage::StorageModel;
use crate::domain::{Money, Price, Timestamp, Volume};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DpConfig {
    pub storage: StorageModel,
    pub num_states: usize,
    /// Per-hour power bounds as position limits.
    pub inject_max: Volume,
    pub withdraw_max: Volume,
    /// Per-unit charges on every traded unit.
    pub fee: Money,
    pub degradation: Money,
    /// Extra per-unit charge on forecast-priced trades.
    pub penalty: Money,
}

/// One delivery hour as the optimizer sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct HourSlot {
    pub delivery: Timestamp,
    pub pricing: HourPricing,
    /// Volume already traded for the hour.
    pub executed: Volume,
    /// Latest recommended position; frozen hours follow it.
    pub committed: Volume,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedHour {
    pub delivery: Timestamp,
    pub source: PriceSource,
    pub target: Volume,
    /// `target - executed`.
    pub trade: Volume,
    pub cash: Money,
    /// Cash net of fee, degradation and penalty.
    pub net_reward: Money,
    pub storage_before: f64,
    pub storage_after: f64,
    pub marginal_price: Option<Price>,
    /// Value of the planned action over holding the executed position.
    pub edge: Option<Money>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DpPlan {
    pub hours: Vec<PlannedHour>,
    pub expected_value: Option<Money>,
    pub feasible: bool,
}

impl DpPlan {
    pub fn hour(&self, delivery: Timestamp) -> Option<&PlannedHour> {
        self.hours.iter().find(|h| h.delivery == delivery)
    }
}

/// Evenly spaced storage levels over `[0, max]`.
#[derive(Debug, Clone, PartialEq)]
struct Grid {
    levels: Vec<f64>,
    step: f64,
}

impl Grid {
    fn new(max: f64, states: usize) -> Self {
        let states = states.max(2);
        let step = max / (states - 1) as f64;
        let levels = (0..states).map(|i| i as f64 * step).collect();
        Self { levels, step }
    }

    fn len(&self) -> usize {
        self.levels.len()
    }

    /// Lower bucket and the weight of the upper one.
    fn locate(&self, level: f64) -> (usize, f64) {
        if self.step <= 0.0 {
            return (0, 0.0);
        }
        let top = self.len() - 2;
        let pos = (level / self.step).clamp(0.0, (self.len() - 1) as f64);
        let i = (pos.floor() as usize).min(top);
        (i, pos - i as f64)
    }

    fn interpolate(&self, values: &[Option<Money>], level: f64) -> Option<Money> {
        let (i, w) = self.locate(level);
        if w <= 0.0 {
            return values[i];
        }
        match (values[i], values[i + 1]) {
            (Some(a), Some(b)) => Some((a as f64 * (1.0 - w) + b as f64 * w).round() as Money),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DpSolver {
    config: DpConfig,
    grid: Grid,
}

impl DpSolver {
    pub fn new(config: DpConfig) -> Self {
        let grid = Grid::new(config.storage.max, config.num_states);
        Self { config, grid }
    }

    pub fn config(&self) -> &DpConfig {
        &self.config
    }

    /// Optimize the horizon from the continuous `storage` level.
    pub fn solve(&self, storage: f64, slots: &[HourSlot]) -> DpPlan {
        let (values, choices) = self.backward(slots);
        let level = self.config.storage.clamp(storage);
        let Some(expected_value) = self.grid.interpolate(&values[0], level) else {
            warn!(storage, hours = slots.len(), "no feasible dispatch, holding positions");
            return self.hold_plan(level, slots);
        };

        let model = &self.config.storage;
        let mut level = level;
        let mut hours = Vec::with_capacity(slots.len());
        for (k, slot) in slots.iter().enumerate() {
            let before = level;
            if slot.pricing.is_frozen() {
                level = model.clamp(level + model.energy(model.fit(level, slot.committed)));
                hours.push(held(slot, slot.committed, before, level));
                continue;
            }

            let hold = slot.executed;
            let mut target = self
                .forward_target(level, &choices[k])
                .unwrap_or(hold);
            if self.reward(slot, target).is_none() {
                target = hold;
            }
            let (cash, net_reward) = self.reward(slot, target).unwrap_or((0, 0));
            let after = self.next_level(level, target);
            let edge = match (
                self.action_value(slot, target, level, &values[k + 1]),
                self.action_value(slot, hold, level, &values[k + 1]),
            ) {
                (Some(act), Some(stay)) => Some(act - stay),
                _ => None,
            };
            level = after;
            hours.push(PlannedHour {
                delivery: slot.delivery,
                source: slot.pricing.source(),
                target,
                trade: target - slot.executed,
                cash,
                net_reward,
                storage_before: before,
                storage_after: after,
                marginal_price: slot.pricing.marginal_price(target - slot.executed),
                edge,
            });
        }

        DpPlan {
            hours,
            expected_value: Some(expected_value),
            feasible: true,
        }
    }

    // ── Backward induction ─────────────────────────────────────────────

    #[allow(clippy::type_complexity)]
    fn backward(&self, slots: &[HourSlot]) -> (Vec<Vec<Option<Money>>>, Vec<Vec<Option<usize>>>) {
        let n = self.grid.len();
        let model = &self.config.storage;
        let mut values = vec![vec![Some(0); n]; slots.len() + 1];
        let mut choices = vec![vec![None; n]; slots.len()];

        for (k, slot) in slots.iter().enumerate().rev() {
            let (head, tail) = values.split_at_mut(k + 1);
            let (current, next) = (&mut head[k], &tail[0]);

            if slot.pricing.is_frozen() {
                for (i, &from) in self.grid.levels.iter().enumerate() {
                    let flow = model.fit(from, slot.committed);
                    current[i] = self.grid.interpolate(next, model.clamp(from + model.energy(flow)));
                }
                continue;
            }

            for (i, &from) in self.grid.levels.iter().enumerate() {
                // (value, |trade|, next bucket)
                let mut best: Option<(Money, Volume, usize)> = None;
                for (j, &to) in self.grid.levels.iter().enumerate() {
                    let Some(target) = self.transition_volume(from, to) else {
                        continue;
                    };
                    let Some((_, net)) = self.reward(slot, target) else {
                        continue;
                    };
                    let Some(future) = next[j] else {
                        continue;
                    };
                    let total = net + future;
                    let throughput = (target - slot.executed).abs();
                    let better = match best {
                        None => true,
                        Some((value, abs, _)) => {
                            total > value || (total == value && throughput < abs)
                        }
                    };
                    if better {
                        best = Some((total, throughput, j));
                    }
                }
                current[i] = best.map(|(value, _, _)| value);
                choices[k][i] = best.map(|(_, _, j)| j);
            }
        }
        (values, choices)
    }

    /// Position that moves the grid from `from` to `to`, within power bounds.
    fn transition_volume(&self, from: f64, to: f64) -> Option<Volume> {
        let target = self.config.storage.volume_for(to - from);
        (-self.config.withdraw_max..=self.config.inject_max)
            .contains(&target)
            .then_some(target)
    }

    /// `(cash, net)` of moving the hour to `target`.
    fn reward(&self, slot: &HourSlot, target: Volume) -> Option<(Money, Money)> {
        let trade = target - slot.executed;
        let cash = slot.pricing.trade_cash(trade)?;
        let mut rate = self.config.fee + self.config.degradation;
        if slot.pricing.is_forecast() {
            rate += self.config.penalty;
        }
        Some((cash, cash - rate * trade.abs() as Money))
    }

    // ── Forward pass ───────────────────────────────────────────────────

    /// Interpolate the neighbouring buckets' next levels and convert the
    /// move into a feasible position.
    fn forward_target(&self, level: f64, choices: &[Option<usize>]) -> Option<Volume> {
        let (i, w) = self.grid.locate(level);
        let lower = choices[i].map(|j| self.grid.levels[j]);
        let upper = if w > 0.0 {
            choices[i + 1].map(|j| self.grid.levels[j])
        } else {
            None
        };
        let next = match (lower, upper) {
            (Some(a), Some(b)) => a * (1.0 - w) + b * w,
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };
        let model = &self.config.storage;
        let target = model
            .volume_for_truncated(next - level)
            .clamp(-self.config.withdraw_max, self.config.inject_max);
        Some(model.fit(level, target))
    }

    fn next_level(&self, level: f64, target: Volume) -> f64 {
        let model = &self.config.storage;
        model.clamp(level + model.energy(model.fit(level, target)))
    }

    fn action_value(
        &self,
        slot: &HourSlot,
        target: Volume,
        level: f64,
        next: &[Option<Money>],
    ) -> Option<Money> {
        let (_, net) = self.reward(slot, target)?;
        let future = self.grid.interpolate(next, self.next_level(level, target))?;
        Some(net + future)
    }

    fn hold_plan(&self, storage: f64, slots: &[HourSlot]) -> DpPlan {
        let mut level = storage;
        let hours = slots
            .iter()
            .map(|slot| {
                let target = if slot.pricing.is_frozen() {
                    slot.committed
                } else {
                    slot.executed
                };
                let before = level;
                level = self.next_level(level, target);
                held(slot, target, before, level)
            })
            .collect();
        DpPlan {
            hours,
            expected_value: None,
            feasible: false,
        }
    }
}

fn held(slot: &HourSlot, target: Volume, before: f64, after: f64) -> PlannedHour {
    PlannedHour {
        delivery: slot.delivery,
        source: slot.pricing.source(),
        target,
        trade: target - slot.executed,
        cash: 0,
        net_reward: 0,
        storage_before: before,
        storage_after: after,
        marginal_price: None,
        edge: None,
    }
}
