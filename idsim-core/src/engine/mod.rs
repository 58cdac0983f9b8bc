//! Simulation engine: the continuous intraday book, the storage dispatch
//! optimizer, and the discrete-event loop tying them together.
//!
//! Each event in the replay runs one of five phases, ordered at equal
//! timestamps:
//!
//! 1. Settlement: the delivery hour closes and its imbalance is settled
//! 2. Ledger: a historical order enters the book
//! 3. Visibility: an agent order reaches the book after the ping delay
//! 4. Decision: a solve's plan becomes available
//! 5. Solve: the optimizer starts on the current book

pub mod cadence;
pub mod dp;
mod event_loop;
pub mod order_book;
pub mod pricing;
pub mod settlement;
pub mod simulation;
pub mod state;
pub mod storage;
pub mod translator;

pub use cadence::{cadence_for, EventDriven, FixedInterval, SolveCadence, SolveDuration};
pub use dp::{DpConfig, DpPlan, DpSolver, HourSlot, PlannedHour};
pub use order_book::{BookEvent, OrderBook, OrderBookError, Owner, Removal, RemovalReason, Trade};
pub use pricing::{HourPricing, Ladder, PriceSource, Sweep};
pub use settlement::{Execution, HourPosition, Settlement};
pub use simulation::{SimError, Simulation, VolPricePairs};
pub use state::{EngineConfig, EngineState, SimStats};
pub use storage::{round_level, StorageModel};
pub use translator::{AgentIntent, DecisionTranslator, HoldReason, Translation, TranslatorConfig};
