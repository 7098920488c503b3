//! Shared vocabulary for the Aegis safety core
//!
//! These types cross subsystem boundaries (gate, healing, learning) and are
//! therefore defined in the substrate so that no subsystem has to depend on
//! another. Event payloads carried on the bus live here too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Unique identifier for agent sessions
pub type SessionId = String;

/// Risk tier of a classified agent action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskTier {
    /// Read-only actions
    T1Read = 1,
    /// Reversible writes
    T2Write = 2,
    /// Infrastructure mutations
    T3Infra = 3,
    /// Financial actions; score is hardcapped and the gate always pauses
    T4Financial = 4,
}

impl RiskTier {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Result<Self> {
        match v {
            1 => Ok(RiskTier::T1Read),
            2 => Ok(RiskTier::T2Write),
            3 => Ok(RiskTier::T3Infra),
            4 => Ok(RiskTier::T4Financial),
            other => Err(Error::Parse(format!("invalid risk tier: {}", other))),
        }
    }

    /// Score a fresh category starts at
    pub fn initial_score(self) -> f64 {
        match self {
            RiskTier::T1Read => 0.75,
            RiskTier::T2Write => 0.65,
            RiskTier::T3Infra => 0.55,
            RiskTier::T4Financial => 0.0,
        }
    }

    /// EWMA learning rate. Zero for T4 enforces the financial hardcap.
    pub fn ewma_alpha(self) -> f64 {
        match self {
            RiskTier::T1Read => 0.10,
            RiskTier::T2Write => 0.20,
            RiskTier::T3Infra => 0.05,
            RiskTier::T4Financial => 0.0,
        }
    }

    /// Score at or above which the gate auto-approves
    pub fn promotion_threshold(self) -> f64 {
        match self {
            RiskTier::T1Read => 0.70,
            RiskTier::T2Write => 0.80,
            RiskTier::T3Infra => 0.90,
            RiskTier::T4Financial => 1.0,
        }
    }

    /// Score below which a demotion milestone fires
    pub fn demotion_threshold(self) -> f64 {
        match self {
            RiskTier::T1Read => 0.60,
            RiskTier::T2Write => 0.70,
            RiskTier::T3Infra => 0.80,
            RiskTier::T4Financial => 1.0,
        }
    }

    /// Score below which the gate blocks outright
    pub fn floor(self) -> f64 {
        match self {
            RiskTier::T1Read => 0.25,
            RiskTier::T2Write => 0.30,
            RiskTier::T3Infra => 0.40,
            RiskTier::T4Financial => 0.0,
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RiskTier::T1Read => "T1_READ",
            RiskTier::T2Write => "T2_WRITE",
            RiskTier::T3Infra => "T3_INFRA",
            RiskTier::T4Financial => "T4_FINANCIAL",
        };
        write!(f, "{}", label)
    }
}

/// Verdict returned by the trust gate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GateVerdict {
    Pass,
    Pause,
    Block,
}

impl GateVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            GateVerdict::Pass => "pass",
            GateVerdict::Pause => "pause",
            GateVerdict::Block => "block",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pass" => Ok(GateVerdict::Pass),
            "pause" => Ok(GateVerdict::Pause),
            "block" => Ok(GateVerdict::Block),
            other => Err(Error::Parse(format!("invalid gate verdict: {}", other))),
        }
    }
}

/// Outcome of a gated action, observed after execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Pending,
    Pass,
    CorrectedMinor,
    CorrectedSignificant,
    ToolErrorExternal,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Pending => "pending",
            OutcomeKind::Pass => "pass",
            OutcomeKind::CorrectedMinor => "corrected_minor",
            OutcomeKind::CorrectedSignificant => "corrected_significant",
            OutcomeKind::ToolErrorExternal => "tool_error_external",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(OutcomeKind::Pending),
            "pass" => Ok(OutcomeKind::Pass),
            "corrected_minor" => Ok(OutcomeKind::CorrectedMinor),
            "corrected_significant" => Ok(OutcomeKind::CorrectedSignificant),
            "tool_error_external" => Ok(OutcomeKind::ToolErrorExternal),
            other => Err(Error::Parse(format!("invalid outcome: {}", other))),
        }
    }

    pub fn is_terminal(self) -> bool {
        self != OutcomeKind::Pending
    }

    /// Target value the EWMA pulls the score toward.
    /// External tool errors are neutral and do not blame the agent.
    pub fn score_target(self) -> Option<f64> {
        match self {
            OutcomeKind::Pending => None,
            OutcomeKind::Pass => Some(1.0),
            OutcomeKind::CorrectedMinor => Some(0.25),
            OutcomeKind::CorrectedSignificant => Some(0.0),
            OutcomeKind::ToolErrorExternal => Some(0.5),
        }
    }
}

/// Trust milestone kinds recorded on threshold crossings and override changes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    FirstAutoApprove,
    TierPromotion,
    TierDemotion,
    Blocked,
    OverrideGranted,
    OverrideRevoked,
}

impl MilestoneKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MilestoneKind::FirstAutoApprove => "first_auto_approve",
            MilestoneKind::TierPromotion => "tier_promotion",
            MilestoneKind::TierDemotion => "tier_demotion",
            MilestoneKind::Blocked => "blocked",
            MilestoneKind::OverrideGranted => "override_granted",
            MilestoneKind::OverrideRevoked => "override_revoked",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "first_auto_approve" => Ok(MilestoneKind::FirstAutoApprove),
            "tier_promotion" => Ok(MilestoneKind::TierPromotion),
            "tier_demotion" => Ok(MilestoneKind::TierDemotion),
            "blocked" => Ok(MilestoneKind::Blocked),
            "override_granted" => Ok(MilestoneKind::OverrideGranted),
            "override_revoked" => Ok(MilestoneKind::OverrideRevoked),
            other => Err(Error::Parse(format!("invalid milestone kind: {}", other))),
        }
    }
}

/// Severity of a health anomaly
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(Error::Parse(format!("invalid severity: {}", other))),
        }
    }
}

/// Kind of a captured failure event in the learning pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ToolError,
    Correction,
    SopViolation,
    TrustDemotion,
    PipelineFailure,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ToolError => "TOOL_ERR",
            FailureKind::Correction => "CORRECT",
            FailureKind::SopViolation => "SOP_VIOL",
            FailureKind::TrustDemotion => "TRUST_DEM",
            FailureKind::PipelineFailure => "PIPE_FAIL",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "TOOL_ERR" => Ok(FailureKind::ToolError),
            "CORRECT" => Ok(FailureKind::Correction),
            "SOP_VIOL" => Ok(FailureKind::SopViolation),
            "TRUST_DEM" => Ok(FailureKind::TrustDemotion),
            "PIPE_FAIL" => Ok(FailureKind::PipelineFailure),
            other => Err(Error::Parse(format!("invalid failure kind: {}", other))),
        }
    }
}

/// Events carried on the process-local bus.
///
/// Producers publish fire-and-forget; subscribers pick the variants they
/// care about and ignore the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusEvent {
    /// A gate decision's outcome resolved
    DecisionResolved {
        decision_id: String,
        category: String,
        old_score: f64,
        new_score: f64,
        outcome: OutcomeKind,
    },
    /// A trust score crossed a threshold or an override changed
    MilestoneEmitted {
        category: String,
        milestone: MilestoneKind,
        old_score: f64,
        new_score: f64,
    },
    /// A self-healing incident transitioned state
    IncidentStateChanged {
        incident_id: String,
        from: String,
        to: String,
        reason: String,
    },
    /// The learning pipeline committed a classified failure
    FailureDetected {
        failure_id: String,
        kind: FailureKind,
        root_cause: String,
    },
    /// A tool invocation finished (observed post-execution)
    ToolResult {
        session_id: SessionId,
        tool_name: String,
        tool_call_id: String,
        exit_code: Option<i64>,
        error: Option<String>,
        at: DateTime<Utc>,
    },
    /// A raw user message arrived
    UserMessage {
        session_id: SessionId,
        text: String,
        at: DateTime<Utc>,
    },
    /// A pre-action SOP hook fired; `honored == false` is a violation
    SopEvent {
        sop_id: String,
        description: String,
        honored: bool,
        at: DateTime<Utc>,
    },
    /// A pipeline stage changed status
    PipelineStage {
        pipeline_id: String,
        stage: String,
        status: String,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_roundtrip() {
        for tier in [
            RiskTier::T1Read,
            RiskTier::T2Write,
            RiskTier::T3Infra,
            RiskTier::T4Financial,
        ] {
            assert_eq!(RiskTier::from_i64(tier.as_i64()).unwrap(), tier);
        }
        assert!(RiskTier::from_i64(0).is_err());
        assert!(RiskTier::from_i64(5).is_err());
    }

    #[test]
    fn t4_alpha_is_zero() {
        assert_eq!(RiskTier::T4Financial.ewma_alpha(), 0.0);
        assert_eq!(RiskTier::T4Financial.initial_score(), 0.0);
    }

    #[test]
    fn thresholds_are_ordered() {
        for tier in [RiskTier::T1Read, RiskTier::T2Write, RiskTier::T3Infra] {
            assert!(tier.floor() < tier.demotion_threshold());
            assert!(tier.demotion_threshold() < tier.promotion_threshold());
        }
    }

    #[test]
    fn outcome_targets() {
        assert_eq!(OutcomeKind::Pass.score_target(), Some(1.0));
        assert_eq!(OutcomeKind::CorrectedMinor.score_target(), Some(0.25));
        assert_eq!(OutcomeKind::CorrectedSignificant.score_target(), Some(0.0));
        assert_eq!(OutcomeKind::ToolErrorExternal.score_target(), Some(0.5));
        assert_eq!(OutcomeKind::Pending.score_target(), None);
    }

    #[test]
    fn string_forms_roundtrip() {
        assert_eq!(GateVerdict::parse("pause").unwrap(), GateVerdict::Pause);
        assert_eq!(
            OutcomeKind::parse("corrected_minor").unwrap(),
            OutcomeKind::CorrectedMinor
        );
        assert_eq!(
            MilestoneKind::parse("tier_demotion").unwrap(),
            MilestoneKind::TierDemotion
        );
        assert_eq!(FailureKind::parse("PIPE_FAIL").unwrap(), FailureKind::PipelineFailure);
        assert!(GateVerdict::parse("allow").is_err());
    }
}
