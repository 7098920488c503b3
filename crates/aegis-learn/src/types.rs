//! Learning pipeline data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use aegis_common::{Error, FailureKind, Result};

/// Payload enqueued by a detector on the hot path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionPayload {
    pub kind: FailureKind,
    pub tier: i64,
    pub source: String,
    pub context: serde_json::Value,
    pub failure_desc: String,
    pub raw_input: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Durable fan-out destinations for one failure's learnings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PropagationTarget {
    SopPatch,
    HookPattern,
    RegressionTest,
    Atom,
    SynapseRelay,
}

impl PropagationTarget {
    pub const ALL: [PropagationTarget; 5] = [
        PropagationTarget::SopPatch,
        PropagationTarget::HookPattern,
        PropagationTarget::RegressionTest,
        PropagationTarget::Atom,
        PropagationTarget::SynapseRelay,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PropagationTarget::SopPatch => "sop_patch",
            PropagationTarget::HookPattern => "hook_pattern",
            PropagationTarget::RegressionTest => "regression_test",
            PropagationTarget::Atom => "atom",
            PropagationTarget::SynapseRelay => "synapse_relay",
        }
    }
}

/// Propagation progress of one failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PropagationStatus {
    Pending,
    Propagated,
    Committed,
    Failed,
}

impl PropagationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PropagationStatus::Pending => "pending",
            PropagationStatus::Propagated => "propagated",
            PropagationStatus::Committed => "committed",
            PropagationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PropagationStatus::Pending),
            "propagated" => Ok(PropagationStatus::Propagated),
            "committed" => Ok(PropagationStatus::Committed),
            "failed" => Ok(PropagationStatus::Failed),
            other => Err(Error::Parse(format!("invalid propagation status: {}", other))),
        }
    }
}

/// One `failure_events` row
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub id: String,
    pub detected_at: DateTime<Utc>,
    pub kind: FailureKind,
    pub tier: i64,
    pub source: String,
    pub context: serde_json::Value,
    pub failure_desc: String,
    pub raw_input: Option<String>,
    pub root_cause: String,
    pub propagation_status: PropagationStatus,
    pub recurrence_count: i64,
}

impl FailureEvent {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let context_raw: String = row.try_get("context")?;
        Ok(FailureEvent {
            id: row.try_get("id")?,
            detected_at: row.try_get("detected_at")?,
            kind: FailureKind::parse(row.try_get::<String, _>("type")?.as_str())?,
            tier: row.try_get("tier")?,
            source: row.try_get("source")?,
            context: serde_json::from_str(&context_raw)?,
            failure_desc: row.try_get("failure_desc")?,
            raw_input: row.try_get("raw_input")?,
            root_cause: row.try_get("root_cause")?,
            propagation_status: PropagationStatus::parse(
                row.try_get::<String, _>("propagation_status")?.as_str(),
            )?,
            recurrence_count: row.try_get("recurrence_count")?,
        })
    }
}

/// One `propagation_records` row
#[derive(Debug, Clone)]
pub struct PropagationRecord {
    pub id: String,
    pub failure_id: String,
    pub target: PropagationTarget,
    pub success: bool,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}
