//! idsim core: intraday electricity trading simulation for a battery.
//!
//! This crate contains the whole simulation:
//! - Fixed-point domain types (prices, volumes, orders, log records)
//! - Order ingestion: replay ledger, binary and CSV files, forecasts
//! - Continuous intraday order book with one book per delivery hour
//! - Dynamic-programming dispatch over storage states
//! - Decision translation, imbalance settlement and the event loop

pub mod data;
pub mod domain;
pub mod engine;
pub mod fingerprint;
pub mod params;

pub use engine::{SimError, SimStats, Simulation};
pub use params::{ParamError, SimulationParameters};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: the simulation and everything it owns can move
    /// to a worker thread (the sweep runner does this).
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::LimitOrder>();
        require_sync::<domain::LimitOrder>();
        require_send::<domain::SimLogs>();
        require_sync::<domain::SimLogs>();
        require_send::<domain::RunId>();
        require_sync::<domain::RunId>();

        // Data
        require_send::<data::OrderLedger>();
        require_sync::<data::OrderLedger>();
        require_send::<data::ForecastTable>();
        require_sync::<data::ForecastTable>();

        // Engine types
        require_send::<engine::OrderBook>();
        require_sync::<engine::OrderBook>();
        require_send::<engine::DpSolver>();
        require_sync::<engine::DpSolver>();
        require_send::<engine::EngineState>();
        require_sync::<engine::EngineState>();
        require_send::<Simulation>();
        require_sync::<Simulation>();

        // Configuration
        require_send::<SimulationParameters>();
        require_sync::<SimulationParameters>();
        require_send::<fingerprint::RunFingerprint>();
        require_sync::<fingerprint::RunFingerprint>();
    }

    /// The solve cadence is a trait object inside the engine state; every
    /// implementation must stay thread-safe.
    #[test]
    fn cadence_trait_objects_are_thread_safe() {
        fn _check(c: Box<dyn engine::SolveCadence>) -> Box<dyn engine::SolveCadence + Send + Sync> {
            c
        }
        let cadence = engine::cadence_for(0.0, 0);
        assert_eq!(cadence.name(), "event-driven");
    }
}
