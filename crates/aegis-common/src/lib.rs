//! Shared substrate for the Aegis safety core
//!
//! Everything the three engines (trust gate, self-healing, real-time
//! learning) have in common lives here: the error taxonomy, configuration,
//! the typed event bus, the clock abstraction and the bounded work queue.
//! Subsystems depend on this crate and the store only, never on each other.

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod scrub;
pub mod types;
pub mod utils;

pub use bus::EventBus;
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    BusConfig, Config, GateConfig, HealingConfig, LearningConfig, NotifyConfig, StoreConfig,
};
pub use error::{Error, Result};
pub use queue::BoundedQueue;
pub use types::{
    BusEvent, FailureKind, GateVerdict, MilestoneKind, OutcomeKind, RiskTier, Severity, SessionId,
};
