//! Real-time learning engine for the Aegis safety core
//!
//! A non-blocking failure-capture pipeline: five detectors enqueue
//! payloads in bounded time, a deterministic classifier assigns a root
//! cause and propagation targets, propagators fan learnings out to durable
//! stores, and a recurrence detector escalates repeats.

pub mod classifier;
pub mod detect;
pub mod engine;
pub mod metrics;
pub mod propagate;
pub mod recurrence;
pub mod types;

pub use classifier::classify;
pub use detect::Detectors;
pub use engine::LearningEngine;
pub use metrics::{LearningMetrics, MetricsReport};
pub use propagate::{AtomSink, CausalAtom, MemoryAtomSink, NullAtomSink, Propagators};
pub use recurrence::RecurrenceDetector;
pub use types::{
    DetectionPayload, FailureEvent, PropagationRecord, PropagationStatus, PropagationTarget,
};
