//! Persisted row types for the trust gate

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use aegis_common::{Error, GateVerdict, MilestoneKind, OutcomeKind, Result, RiskTier};

use crate::milestones::Thresholds;

/// One gate invocation, as persisted in `decision_log`
#[derive(Debug, Clone)]
pub struct Decision {
    pub decision_id: String,
    pub session_id: String,
    pub tool_name: String,
    pub tool_params_hash: String,
    pub tool_params_summary: String,
    pub risk_tier: RiskTier,
    pub category: String,
    pub verdict: GateVerdict,
    pub trust_score_at_decision: f64,
    pub override_active: bool,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub outcome: OutcomeKind,
}

impl Decision {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Decision {
            decision_id: row.try_get("decision_id")?,
            session_id: row.try_get("session_id")?,
            tool_name: row.try_get("tool_name")?,
            tool_params_hash: row.try_get("tool_params_hash")?,
            tool_params_summary: row.try_get("tool_params_summary")?,
            risk_tier: RiskTier::from_i64(row.try_get("risk_tier")?)?,
            category: row.try_get("category")?,
            verdict: GateVerdict::parse(row.try_get::<String, _>("gate_decision")?.as_str())?,
            trust_score_at_decision: row.try_get("trust_score_at_decision")?,
            override_active: row.try_get("override_active")?,
            reason: row.try_get("reason")?,
            timestamp: row.try_get("timestamp")?,
            outcome: OutcomeKind::parse(row.try_get::<String, _>("outcome")?.as_str())?,
        })
    }
}

/// One `trust_scores` row
#[derive(Debug, Clone)]
pub struct TrustScoreRow {
    pub category: String,
    pub risk_tier: RiskTier,
    pub current_score: f64,
    pub ewma_alpha: f64,
    pub initial_score: f64,
    pub promotion_threshold: f64,
    pub demotion_threshold: f64,
    pub floor: f64,
    pub updated_at: DateTime<Utc>,
}

impl TrustScoreRow {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(TrustScoreRow {
            category: row.try_get("category")?,
            risk_tier: RiskTier::from_i64(row.try_get("risk_tier")?)?,
            current_score: row.try_get("current_score")?,
            ewma_alpha: row.try_get("ewma_alpha")?,
            initial_score: row.try_get("initial_score")?,
            promotion_threshold: row.try_get("promotion_threshold")?,
            demotion_threshold: row.try_get("demotion_threshold")?,
            floor: row.try_get("floor")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            promotion: self.promotion_threshold,
            demotion: self.demotion_threshold,
            floor: self.floor,
        }
    }
}

/// Manual policy patch direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    Granted,
    Revoked,
}

impl OverrideKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OverrideKind::Granted => "granted",
            OverrideKind::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "granted" => Ok(OverrideKind::Granted),
            "revoked" => Ok(OverrideKind::Revoked),
            other => Err(Error::Parse(format!("invalid override type: {}", other))),
        }
    }

    pub fn milestone(self) -> MilestoneKind {
        match self {
            OverrideKind::Granted => MilestoneKind::OverrideGranted,
            OverrideKind::Revoked => MilestoneKind::OverrideRevoked,
        }
    }
}

/// One `trust_overrides` row
#[derive(Debug, Clone)]
pub struct OverrideRow {
    pub override_id: String,
    pub category: String,
    pub override_type: OverrideKind,
    pub reason: String,
    pub granted_by: String,
    pub granted_from_session: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl OverrideRow {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(OverrideRow {
            override_id: row.try_get("override_id")?,
            category: row.try_get("category")?,
            override_type: OverrideKind::parse(
                row.try_get::<String, _>("override_type")?.as_str(),
            )?,
            reason: row.try_get("reason")?,
            granted_by: row.try_get("granted_by")?,
            granted_from_session: row.try_get("granted_from_session")?,
            expires_at: row.try_get("expires_at")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Insert one milestone audit row inside an open transaction
pub(crate) async fn insert_milestone_row(
    tx: &mut Transaction<'_, Sqlite>,
    category: &str,
    kind: MilestoneKind,
    old_score: f64,
    new_score: f64,
    trigger: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO trust_milestones
            (milestone_id, category, milestone_type, old_score, new_score, trigger, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(aegis_common::utils::new_id("mst"))
    .bind(category)
    .bind(kind.as_str())
    .bind(old_score)
    .bind(new_score)
    .bind(trigger)
    .bind(at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
