//! Simulation parameters: the flat, individually settable configuration.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::units::{parse_timestamp, to_datetime};
use crate::domain::Timestamp;

#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("unknown parameter `{0}`")]
    Unknown(String),

    #[error("parameter `{name}`: cannot parse `{value}`")]
    Parse { name: String, value: String },

    #[error("parameter `{name}` out of range: {reason}")]
    OutOfRange { name: &'static str, reason: String },
}

/// Every knob of a simulation run.
///
/// Units: energy in MWh, power in MW, prices and costs in EUR/MWh, delays in
/// milliseconds, horizons in minutes before delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub storage_max: f64,
    pub lin_deg_cost: f64,
    pub loss_in: f64,
    pub loss_out: f64,
    pub trading_fee: f64,
    pub num_stor_states: u32,
    /// Decimals kept when storage is committed.
    pub sto_round_dec: u32,
    pub ping_delay: i64,
    /// Simulated solve duration; -1 uses the measured wall-clock time.
    pub fixed_solve_time: i64,
    /// Minutes between solves; 0 re-solves on market events.
    pub dp_freq: f64,
    pub withdraw_max: f64,
    pub inject_max: f64,
    pub fore_horizon_start: i64,
    pub fore_horizon_end: i64,
    pub bid_ask_penalty: f64,
    pub check_profit: bool,
    pub check_lo_exec: bool,
    pub use_sliding: bool,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        // 2021-01-01T00:00:00Z .. 2021-01-02T00:00:00Z
        let start = DateTime::from_timestamp(1_609_459_200, 0).unwrap_or_default();
        let end = DateTime::from_timestamp(1_609_545_600, 0).unwrap_or_default();
        Self {
            start,
            end,
            storage_max: 10.0,
            lin_deg_cost: 4.0,
            loss_in: 0.95,
            loss_out: 0.95,
            trading_fee: 0.09,
            num_stor_states: 11,
            sto_round_dec: 3,
            ping_delay: 0,
            fixed_solve_time: 0,
            dp_freq: 15.0,
            withdraw_max: 10.0,
            inject_max: 10.0,
            fore_horizon_start: 600,
            fore_horizon_end: 75,
            bid_ask_penalty: 0.0,
            check_profit: false,
            check_lo_exec: false,
            use_sliding: true,
        }
    }
}

impl SimulationParameters {
    pub const NAMES: &'static [&'static str] = &[
        "start",
        "end",
        "storage_max",
        "lin_deg_cost",
        "loss_in",
        "loss_out",
        "trading_fee",
        "num_stor_states",
        "sto_round_dec",
        "ping_delay",
        "fixed_solve_time",
        "dp_freq",
        "withdraw_max",
        "inject_max",
        "fore_horizon_start",
        "fore_horizon_end",
        "bid_ask_penalty",
        "check_profit",
        "check_lo_exec",
        "use_sliding",
    ];

    pub fn start_ms(&self) -> Timestamp {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> Timestamp {
        self.end.timestamp_millis()
    }

    /// Set one parameter from its textual value.
    ///
    /// Only the value's own range is checked here; `validate` checks the
    /// relations between fields.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ParamError> {
        let value = value.trim();
        match name {
            "start" => self.start = parse_datetime(name, value)?,
            "end" => self.end = parse_datetime(name, value)?,
            "storage_max" => self.storage_max = non_negative("storage_max", parse(name, value)?)?,
            "lin_deg_cost" => self.lin_deg_cost = non_negative("lin_deg_cost", parse(name, value)?)?,
            "loss_in" => self.loss_in = efficiency("loss_in", parse(name, value)?)?,
            "loss_out" => self.loss_out = efficiency("loss_out", parse(name, value)?)?,
            "trading_fee" => self.trading_fee = non_negative("trading_fee", parse(name, value)?)?,
            "num_stor_states" => {
                self.num_stor_states = at_least("num_stor_states", parse(name, value)?, 2)?
            }
            "sto_round_dec" => {
                self.sto_round_dec = at_most("sto_round_dec", parse(name, value)?, 9)?
            }
            "ping_delay" => self.ping_delay = non_negative_ms("ping_delay", parse(name, value)?)?,
            "fixed_solve_time" => {
                let ms: i64 = parse(name, value)?;
                if ms < -1 {
                    return Err(ParamError::OutOfRange {
                        name: "fixed_solve_time",
                        reason: format!("{ms} is neither >= 0 nor -1"),
                    });
                }
                self.fixed_solve_time = ms;
            }
            "dp_freq" => self.dp_freq = non_negative("dp_freq", parse(name, value)?)?,
            "withdraw_max" => self.withdraw_max = non_negative("withdraw_max", parse(name, value)?)?,
            "inject_max" => self.inject_max = non_negative("inject_max", parse(name, value)?)?,
            "fore_horizon_start" => {
                self.fore_horizon_start = non_negative_ms("fore_horizon_start", parse(name, value)?)?
            }
            "fore_horizon_end" => {
                self.fore_horizon_end = non_negative_ms("fore_horizon_end", parse(name, value)?)?
            }
            "bid_ask_penalty" => {
                self.bid_ask_penalty = non_negative("bid_ask_penalty", parse(name, value)?)?
            }
            "check_profit" => self.check_profit = parse(name, value)?,
            "check_lo_exec" => self.check_lo_exec = parse(name, value)?,
            "use_sliding" => self.use_sliding = parse(name, value)?,
            other => return Err(ParamError::Unknown(other.to_string())),
        }
        Ok(())
    }

    /// Check every field's range plus the window and horizon ordering.
    pub fn validate(&self) -> Result<(), ParamError> {
        non_negative("storage_max", self.storage_max)?;
        non_negative("lin_deg_cost", self.lin_deg_cost)?;
        efficiency("loss_in", self.loss_in)?;
        efficiency("loss_out", self.loss_out)?;
        non_negative("trading_fee", self.trading_fee)?;
        at_least("num_stor_states", self.num_stor_states, 2)?;
        at_most("sto_round_dec", self.sto_round_dec, 9)?;
        non_negative_ms("ping_delay", self.ping_delay)?;
        if self.fixed_solve_time < -1 {
            return Err(ParamError::OutOfRange {
                name: "fixed_solve_time",
                reason: format!("{} is neither >= 0 nor -1", self.fixed_solve_time),
            });
        }
        non_negative("dp_freq", self.dp_freq)?;
        non_negative("withdraw_max", self.withdraw_max)?;
        non_negative("inject_max", self.inject_max)?;
        non_negative_ms("fore_horizon_end", self.fore_horizon_end)?;
        non_negative("bid_ask_penalty", self.bid_ask_penalty)?;

        if self.fore_horizon_start <= self.fore_horizon_end {
            return Err(ParamError::OutOfRange {
                name: "fore_horizon_start",
                reason: format!(
                    "{} must exceed fore_horizon_end ({})",
                    self.fore_horizon_start, self.fore_horizon_end
                ),
            });
        }
        if self.start >= self.end {
            return Err(ParamError::OutOfRange {
                name: "end",
                reason: format!("{} is not after start {}", self.end, self.start),
            });
        }
        Ok(())
    }
}

impl fmt::Display for SimulationParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "start              = {}", self.start.to_rfc3339())?;
        writeln!(f, "end                = {}", self.end.to_rfc3339())?;
        writeln!(f, "storage_max        = {} MWh", self.storage_max)?;
        writeln!(f, "lin_deg_cost       = {} EUR/MWh", self.lin_deg_cost)?;
        writeln!(f, "loss_in            = {}", self.loss_in)?;
        writeln!(f, "loss_out           = {}", self.loss_out)?;
        writeln!(f, "trading_fee        = {} EUR/MWh", self.trading_fee)?;
        writeln!(f, "num_stor_states    = {}", self.num_stor_states)?;
        writeln!(f, "sto_round_dec      = {}", self.sto_round_dec)?;
        writeln!(f, "ping_delay         = {} ms", self.ping_delay)?;
        writeln!(f, "fixed_solve_time   = {} ms", self.fixed_solve_time)?;
        writeln!(f, "dp_freq            = {} min", self.dp_freq)?;
        writeln!(f, "withdraw_max       = {} MW", self.withdraw_max)?;
        writeln!(f, "inject_max         = {} MW", self.inject_max)?;
        writeln!(f, "fore_horizon_start = {} min", self.fore_horizon_start)?;
        writeln!(f, "fore_horizon_end   = {} min", self.fore_horizon_end)?;
        writeln!(f, "bid_ask_penalty    = {} EUR/MWh", self.bid_ask_penalty)?;
        writeln!(f, "check_profit       = {}", self.check_profit)?;
        writeln!(f, "check_lo_exec      = {}", self.check_lo_exec)?;
        write!(f, "use_sliding        = {}", self.use_sliding)
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ParamError> {
    value.parse().map_err(|_| ParamError::Parse {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_datetime(name: &str, value: &str) -> Result<DateTime<Utc>, ParamError> {
    parse_timestamp(value)
        .and_then(to_datetime)
        .ok_or_else(|| ParamError::Parse {
            name: name.to_string(),
            value: value.to_string(),
        })
}

fn non_negative(name: &'static str, value: f64) -> Result<f64, ParamError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ParamError::OutOfRange {
            name,
            reason: format!("{value} must be a finite, non-negative number"),
        })
    }
}

fn non_negative_ms(name: &'static str, value: i64) -> Result<i64, ParamError> {
    if value >= 0 {
        Ok(value)
    } else {
        Err(ParamError::OutOfRange {
            name,
            reason: format!("{value} must be non-negative"),
        })
    }
}

fn efficiency(name: &'static str, value: f64) -> Result<f64, ParamError> {
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(ParamError::OutOfRange {
            name,
            reason: format!("{value} must lie in (0, 1]"),
        })
    }
}

fn at_least(name: &'static str, value: u32, min: u32) -> Result<u32, ParamError> {
    if value >= min {
        Ok(value)
    } else {
        Err(ParamError::OutOfRange {
            name,
            reason: format!("{value} must be at least {min}"),
        })
    }
}

fn at_most(name: &'static str, value: u32, max: u32) -> Result<u32, ParamError> {
    if value <= max {
        Ok(value)
    } else {
        Err(ParamError::OutOfRange {
            name,
            reason: format!("{value} must be at most {max}"),
        })
    }
}
