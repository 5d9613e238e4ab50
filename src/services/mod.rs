//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `debounce` - N-consecutive-sample filter
//! - `occupancy` - Per-slot occupancy state machine
//! - `accountant` - Session charge computation
//! - `state_store` - Shared slot snapshot
//! - `gate` - Entry gate state machine
//! - `dispatch` - Non-blocking hand-off to the async workers
//! - `history_worker` - Serialized history appends with retry
//! - `notify_worker` - Notification delivery
//! - `poller` - Sensor polling loop driving all of the above

pub mod accountant;
pub mod debounce;
pub mod dispatch;
pub mod gate;
pub mod history_worker;
pub mod notify_worker;
pub mod occupancy;
pub mod poller;
pub mod state_store;

// Re-export commonly used types
pub use accountant::{PerSecondTariff, SessionAccountant, Tariff};
pub use dispatch::EventDispatcher;
pub use gate::{GateActuator, GateController, GateEvent, GateMotion, GateState, GateTiming};
pub use history_worker::{create_history_worker, HistoryWorker, RetryPolicy};
pub use notify_worker::{create_notify_worker, NotifyWorker};
pub use occupancy::OccupancyStateMachine;
pub use poller::{GateStation, PollingDriver};
pub use state_store::{SharedStateStore, Snapshot};
