//! Incident manager
//!
//! Deduplicating wrapper over the anomaly stream. At most one non-terminal
//! incident exists per `(anomaly_type, target_id)`; re-detections refresh
//! the open incident instead of duplicating it. State transitions are
//! linear forward, with one retraction: a dismissed incident whose window
//! has lapsed reopens into `detected` with its audit trail retained.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info};

use aegis_common::utils::new_id;
use aegis_common::{BusEvent, Error, EventBus, Result, Severity, SharedClock};
use aegis_store::Store;

use crate::anomaly::{AnomalyType, HealthAnomaly};

/// Incident lifecycle states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    Detected,
    Diagnosing,
    Remediating,
    Verifying,
    Escalated,
    Resolved,
    SelfResolved,
    Dismissed,
}

impl IncidentState {
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentState::Detected => "detected",
            IncidentState::Diagnosing => "diagnosing",
            IncidentState::Remediating => "remediating",
            IncidentState::Verifying => "verifying",
            IncidentState::Escalated => "escalated",
            IncidentState::Resolved => "resolved",
            IncidentState::SelfResolved => "self_resolved",
            IncidentState::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "detected" => Ok(IncidentState::Detected),
            "diagnosing" => Ok(IncidentState::Diagnosing),
            "remediating" => Ok(IncidentState::Remediating),
            "verifying" => Ok(IncidentState::Verifying),
            "escalated" => Ok(IncidentState::Escalated),
            "resolved" => Ok(IncidentState::Resolved),
            "self_resolved" => Ok(IncidentState::SelfResolved),
            "dismissed" => Ok(IncidentState::Dismissed),
            other => Err(Error::Parse(format!("invalid incident state: {}", other))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IncidentState::Resolved | IncidentState::SelfResolved | IncidentState::Dismissed
        )
    }
}

/// One entry of an incident's audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub from: Option<String>,
    pub to: String,
    pub note: String,
}

/// One `incidents` row
#[derive(Debug, Clone)]
pub struct Incident {
    pub id: String,
    pub anomaly_type: AnomalyType,
    pub target_id: String,
    pub severity: Severity,
    pub state: IncidentState,
    pub runbook_id: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub escalation_tier: Option<i64>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub dismiss_until: Option<DateTime<Utc>>,
    pub audit_trail: Vec<AuditEntry>,
    pub details: serde_json::Value,
}

impl Incident {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let audit_raw: String = row.try_get("audit_trail")?;
        let details_raw: String = row.try_get("details")?;
        Ok(Incident {
            id: row.try_get("id")?,
            anomaly_type: AnomalyType::parse(row.try_get::<String, _>("anomaly_type")?.as_str())?,
            target_id: row.try_get("target_id")?,
            severity: Severity::parse(row.try_get::<String, _>("severity")?.as_str())?,
            state: IncidentState::parse(row.try_get::<String, _>("state")?.as_str())?,
            runbook_id: row.try_get("runbook_id")?,
            detected_at: row.try_get("detected_at")?,
            state_changed_at: row.try_get("state_changed_at")?,
            resolved_at: row.try_get("resolved_at")?,
            escalation_tier: row.try_get("escalation_tier")?,
            escalated_at: row.try_get("escalated_at")?,
            dismiss_until: row.try_get("dismiss_until")?,
            audit_trail: serde_json::from_str(&audit_raw)?,
            details: serde_json::from_str(&details_raw)?,
        })
    }
}

/// Result of feeding one anomaly through the dedup upsert
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// A new (or reopened) incident; the engine should handle it
    Created(Incident),
    /// An open incident was refreshed; no new handling
    Refreshed(Incident),
    /// A dismissal window is active; the anomaly was skipped
    Suppressed,
}

/// Allowed forward transitions of the incident state machine
fn transition_allowed(from: IncidentState, to: IncidentState) -> bool {
    use IncidentState::*;
    matches!(
        (from, to),
        (Detected, Diagnosing)
            | (Diagnosing, Remediating)
            | (Diagnosing, Verifying)
            | (Diagnosing, Escalated)
            | (Remediating, Verifying)
            | (Remediating, Escalated)
            | (Verifying, Resolved)
            | (Verifying, SelfResolved)
            | (Verifying, Escalated)
            | (Escalated, Resolved)
    ) || (to == Dismissed && !from.is_terminal())
}

pub struct IncidentManager {
    store: Store,
    bus: EventBus,
    clock: SharedClock,
}

impl IncidentManager {
    pub fn new(store: Store, bus: EventBus, clock: SharedClock) -> Self {
        IncidentManager { store, bus, clock }
    }

    /// Deduplicating upsert for one anomaly. Transactional so concurrent
    /// upserts for the same `(type, target)` produce exactly one incident.
    pub async fn upsert(&self, anomaly: &HealthAnomaly) -> Result<UpsertOutcome> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let latest = sqlx::query(
            r#"
            SELECT * FROM incidents
            WHERE anomaly_type = ? AND target_id = ?
            ORDER BY detected_at DESC
            LIMIT 1
            "#,
        )
        .bind(anomaly.anomaly_type.as_str())
        .bind(&anomaly.target_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = latest {
            let incident = Incident::from_row(&row)?;

            if !incident.state.is_terminal() {
                let refreshed = self
                    .append_audit(
                        &mut tx,
                        incident,
                        None,
                        "re-detected while open",
                        Some(&anomaly.details),
                        now,
                    )
                    .await?;
                tx.commit().await?;
                debug!(incident_id = %refreshed.id, "anomaly re-detection refreshed open incident");
                return Ok(UpsertOutcome::Refreshed(refreshed));
            }

            if incident.state == IncidentState::Dismissed {
                if let Some(until) = incident.dismiss_until {
                    if until > now {
                        tx.commit().await?;
                        debug!(incident_id = %incident.id, "anomaly suppressed by dismissal window");
                        return Ok(UpsertOutcome::Suppressed);
                    }
                }
                // dismissal lapsed: reopen with the audit trail retained
                let mut audit = incident.audit_trail.clone();
                audit.push(AuditEntry {
                    at: now,
                    from: Some(IncidentState::Dismissed.as_str().to_string()),
                    to: IncidentState::Detected.as_str().to_string(),
                    note: "re-fired after dismissal window lapsed".to_string(),
                });
                sqlx::query(
                    r#"
                    UPDATE incidents
                    SET state = 'detected', state_changed_at = ?, resolved_at = NULL,
                        dismiss_until = NULL, audit_trail = ?, details = ?
                    WHERE id = ?
                    "#,
                )
                .bind(now)
                .bind(serde_json::to_string(&audit)?)
                .bind(anomaly.details.to_string())
                .bind(&incident.id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                let reopened = self.get(&incident.id).await?;
                info!(incident_id = %reopened.id, "dismissed incident reopened");
                self.publish_change(&reopened.id, "dismissed", "detected", "dismissal lapsed");
                return Ok(UpsertOutcome::Created(reopened));
            }
        }

        // no live incident for this pair: create one
        let incident = Incident {
            id: new_id("inc"),
            anomaly_type: anomaly.anomaly_type,
            target_id: anomaly.target_id.clone(),
            severity: anomaly.severity,
            state: IncidentState::Detected,
            runbook_id: None,
            detected_at: now,
            state_changed_at: now,
            resolved_at: None,
            escalation_tier: None,
            escalated_at: None,
            dismiss_until: None,
            audit_trail: vec![AuditEntry {
                at: now,
                from: None,
                to: IncidentState::Detected.as_str().to_string(),
                note: format!("detected by {}", anomaly.source_id),
            }],
            details: anomaly.details.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO incidents
                (id, anomaly_type, target_id, severity, state, runbook_id,
                 detected_at, state_changed_at, resolved_at, escalation_tier,
                 escalated_at, dismiss_until, audit_trail, details)
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?, NULL, NULL, NULL, NULL, ?, ?)
            "#,
        )
        .bind(&incident.id)
        .bind(incident.anomaly_type.as_str())
        .bind(&incident.target_id)
        .bind(incident.severity.as_str())
        .bind(incident.state.as_str())
        .bind(incident.detected_at)
        .bind(incident.state_changed_at)
        .bind(serde_json::to_string(&incident.audit_trail)?)
        .bind(incident.details.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            incident_id = %incident.id,
            anomaly = %incident.anomaly_type,
            target = %incident.target_id,
            "incident opened"
        );
        Ok(UpsertOutcome::Created(incident))
    }

    /// Transition an incident forward, appending to its audit trail
    pub async fn transition(
        &self,
        incident_id: &str,
        to: IncidentState,
        reason: &str,
    ) -> Result<Incident> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let row = sqlx::query("SELECT * FROM incidents WHERE id = ?")
            .bind(incident_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::Storage(format!("unknown incident: {}", incident_id)))?;
        let incident = Incident::from_row(&row)?;

        if !transition_allowed(incident.state, to) {
            return Err(Error::Validation(format!(
                "illegal incident transition {} -> {}",
                incident.state.as_str(),
                to.as_str()
            )));
        }

        let mut audit = incident.audit_trail.clone();
        audit.push(AuditEntry {
            at: now,
            from: Some(incident.state.as_str().to_string()),
            to: to.as_str().to_string(),
            note: reason.to_string(),
        });

        let resolved_at = if to.is_terminal() { Some(now) } else { None };
        let escalated_at = if to == IncidentState::Escalated {
            Some(now)
        } else {
            incident.escalated_at
        };

        sqlx::query(
            r#"
            UPDATE incidents
            SET state = ?, state_changed_at = ?, resolved_at = ?,
                escalated_at = ?, audit_trail = ?
            WHERE id = ?
            "#,
        )
        .bind(to.as_str())
        .bind(now)
        .bind(resolved_at)
        .bind(escalated_at)
        .bind(serde_json::to_string(&audit)?)
        .bind(incident_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.publish_change(incident_id, incident.state.as_str(), to.as_str(), reason);
        self.get(incident_id).await
    }

    /// Record the selected runbook on an incident
    pub async fn set_runbook(&self, incident_id: &str, runbook_id: &str) -> Result<()> {
        sqlx::query("UPDATE incidents SET runbook_id = ? WHERE id = ?")
            .bind(runbook_id)
            .bind(incident_id)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    /// Record the escalation tier chosen by the router
    pub async fn set_escalation(&self, incident_id: &str, tier: i64) -> Result<()> {
        sqlx::query("UPDATE incidents SET escalation_tier = ? WHERE id = ?")
            .bind(tier)
            .bind(incident_id)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    /// Operator action: silence this `(type, target)` pair until the given
    /// instant
    pub async fn dismiss(&self, incident_id: &str, until: DateTime<Utc>) -> Result<Incident> {
        let incident = self.transition(incident_id, IncidentState::Dismissed, "dismissed by operator").await?;
        sqlx::query("UPDATE incidents SET dismiss_until = ? WHERE id = ?")
            .bind(until)
            .bind(incident_id)
            .execute(self.store.pool())
            .await?;
        self.get(&incident.id).await
    }

    pub(crate) fn store_pool(&self) -> &sqlx::SqlitePool {
        self.store.pool()
    }

    pub async fn get(&self, incident_id: &str) -> Result<Incident> {
        let row = sqlx::query("SELECT * FROM incidents WHERE id = ?")
            .bind(incident_id)
            .fetch_optional(self.store.pool())
            .await?
            .ok_or_else(|| Error::Storage(format!("unknown incident: {}", incident_id)))?;
        Incident::from_row(&row)
    }

    /// All incidents not in a terminal state
    pub async fn open_incidents(&self) -> Result<Vec<Incident>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM incidents
            WHERE state NOT IN ('resolved', 'self_resolved', 'dismissed')
            ORDER BY detected_at
            "#,
        )
        .fetch_all(self.store.pool())
        .await?;
        rows.iter().map(Incident::from_row).collect()
    }

    async fn append_audit(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        incident: Incident,
        from: Option<IncidentState>,
        note: &str,
        details: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let mut audit = incident.audit_trail.clone();
        audit.push(AuditEntry {
            at: now,
            from: from.map(|s| s.as_str().to_string()),
            to: incident.state.as_str().to_string(),
            note: note.to_string(),
        });
        let details_text = details
            .map(|d| d.to_string())
            .unwrap_or_else(|| incident.details.to_string());
        sqlx::query("UPDATE incidents SET audit_trail = ?, details = ? WHERE id = ?")
            .bind(serde_json::to_string(&audit)?)
            .bind(&details_text)
            .bind(&incident.id)
            .execute(&mut **tx)
            .await?;

        let mut refreshed = incident;
        refreshed.audit_trail = audit;
        refreshed.details = serde_json::from_str(&details_text)?;
        Ok(refreshed)
    }

    fn publish_change(&self, incident_id: &str, from: &str, to: &str, reason: &str) {
        self.bus.publish(BusEvent::IncidentStateChanged {
            incident_id: incident_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use aegis_common::{Clock, ManualClock};
    use chrono::Duration;
    use serde_json::json;

    fn anomaly() -> HealthAnomaly {
        HealthAnomaly {
            id: "anm-1".into(),
            anomaly_type: AnomalyType::DiskPressure,
            target_id: "/".into(),
            severity: Severity::High,
            detected_at: Utc::now(),
            source_id: "heal.disk".into(),
            details: json!({"usage_pct": 0.9}),
            remediation_hint: None,
        }
    }

    async fn manager() -> (IncidentManager, Arc<ManualClock>) {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (
            IncidentManager::new(store, EventBus::default(), clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn re_detection_refreshes_instead_of_duplicating() {
        let (mgr, _) = manager().await;
        let first = match mgr.upsert(&anomaly()).await.unwrap() {
            UpsertOutcome::Created(i) => i,
            other => panic!("expected created, got {:?}", other),
        };
        let second = match mgr.upsert(&anomaly()).await.unwrap() {
            UpsertOutcome::Refreshed(i) => i,
            other => panic!("expected refreshed, got {:?}", other),
        };
        assert_eq!(first.id, second.id);
        assert!(second.audit_trail.len() > first.audit_trail.len());
    }

    #[tokio::test]
    async fn resolved_incident_gives_way_to_a_new_one() {
        let (mgr, _) = manager().await;
        let first = match mgr.upsert(&anomaly()).await.unwrap() {
            UpsertOutcome::Created(i) => i,
            other => panic!("{:?}", other),
        };
        mgr.transition(&first.id, IncidentState::Diagnosing, "probe")
            .await
            .unwrap();
        mgr.transition(&first.id, IncidentState::Remediating, "runbook")
            .await
            .unwrap();
        mgr.transition(&first.id, IncidentState::Verifying, "executed")
            .await
            .unwrap();
        let resolved = mgr
            .transition(&first.id, IncidentState::Resolved, "clean re-probe")
            .await
            .unwrap();
        assert!(resolved.resolved_at.is_some());

        match mgr.upsert(&anomaly()).await.unwrap() {
            UpsertOutcome::Created(second) => assert_ne!(second.id, first.id),
            other => panic!("expected new incident, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn illegal_transitions_rejected() {
        let (mgr, _) = manager().await;
        let incident = match mgr.upsert(&anomaly()).await.unwrap() {
            UpsertOutcome::Created(i) => i,
            other => panic!("{:?}", other),
        };
        // detected cannot jump straight to resolved
        let err = mgr
            .transition(&incident.id, IncidentState::Resolved, "shortcut")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn dismissal_window_suppresses_then_reopens() {
        let (mgr, clock) = manager().await;
        let incident = match mgr.upsert(&anomaly()).await.unwrap() {
            UpsertOutcome::Created(i) => i,
            other => panic!("{:?}", other),
        };
        let until = clock.now() + Duration::hours(1);
        mgr.dismiss(&incident.id, until).await.unwrap();

        // inside the window: suppressed
        match mgr.upsert(&anomaly()).await.unwrap() {
            UpsertOutcome::Suppressed => {}
            other => panic!("expected suppressed, got {:?}", other),
        }

        // after the window: reopened with audit retained
        clock.advance(Duration::hours(2));
        match mgr.upsert(&anomaly()).await.unwrap() {
            UpsertOutcome::Created(reopened) => {
                assert_eq!(reopened.id, incident.id);
                assert_eq!(reopened.state, IncidentState::Detected);
                assert!(reopened
                    .audit_trail
                    .iter()
                    .any(|e| e.note.contains("dismissal window lapsed")));
            }
            other => panic!("expected reopen, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn terminal_states_set_resolved_at() {
        let (mgr, _) = manager().await;
        let incident = match mgr.upsert(&anomaly()).await.unwrap() {
            UpsertOutcome::Created(i) => i,
            other => panic!("{:?}", other),
        };
        mgr.transition(&incident.id, IncidentState::Diagnosing, "x")
            .await
            .unwrap();
        mgr.transition(&incident.id, IncidentState::Verifying, "no action needed")
            .await
            .unwrap();
        let done = mgr
            .transition(&incident.id, IncidentState::SelfResolved, "cleared on re-probe")
            .await
            .unwrap();
        assert!(done.resolved_at.is_some());
        assert!(mgr.open_incidents().await.unwrap().is_empty());
    }
}
