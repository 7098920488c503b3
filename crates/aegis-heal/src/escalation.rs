//! Escalation router
//!
//! Decides how loudly to notify for an incident and performs the
//! notification. Tiers are a notification surface, not incident state:
//! 0 silent (metric only), 1 synapse summary, 2 synapse with proposed
//! actions awaiting an operator, 3 synapse plus signal.

use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use aegis_common::{Result, Severity};
use aegis_notify::{Notifier, Priority};

use crate::incident::Incident;
use crate::runbook::RunbookMode;

/// Notification loudness, 0 through 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EscalationTier {
    Silent,
    Summary,
    Plan,
    Operator,
}

impl EscalationTier {
    pub fn as_i64(self) -> i64 {
        match self {
            EscalationTier::Silent => 0,
            EscalationTier::Summary => 1,
            EscalationTier::Plan => 2,
            EscalationTier::Operator => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EscalationTier::Silent => "0",
            EscalationTier::Summary => "1",
            EscalationTier::Plan => "2",
            EscalationTier::Operator => "3",
        }
    }
}

/// Tier policy for a diagnosed incident
pub fn determine_tier(
    severity: Severity,
    mode: RunbookMode,
    confidence: f64,
    confidence_auto_execute: f64,
    remediation_failed: bool,
) -> EscalationTier {
    if severity == Severity::Critical {
        return EscalationTier::Operator;
    }
    if remediation_failed {
        return if severity >= Severity::High {
            EscalationTier::Operator
        } else {
            EscalationTier::Plan
        };
    }
    match mode {
        RunbookMode::DryRun => {
            if confidence >= confidence_auto_execute {
                EscalationTier::Summary
            } else {
                EscalationTier::Plan
            }
        }
        RunbookMode::AutoExecute => {
            if confidence >= confidence_auto_execute {
                EscalationTier::Silent
            } else {
                EscalationTier::Plan
            }
        }
    }
}

pub struct EscalationRouter {
    notifier: Arc<dyn Notifier>,
}

impl EscalationRouter {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        EscalationRouter { notifier }
    }

    /// Notify at the given tier. Message bodies carry a verdict line, the
    /// affected target and the incident id so operators can query it.
    pub async fn route(
        &self,
        incident: &Incident,
        tier: EscalationTier,
        verdict: &str,
        proposed: Option<&[String]>,
    ) -> Result<()> {
        counter!("aegis_heal_escalations_total", "tier" => tier.label()).increment(1);

        if tier == EscalationTier::Silent {
            debug!(incident_id = %incident.id, "silent escalation, metric only");
            return Ok(());
        }

        let subject = format!(
            "[heal] {} on {}",
            incident.anomaly_type.as_str(),
            incident.target_id
        );
        let mut body = format!(
            "verdict: {}\ntarget: {}\nincident: {}",
            verdict, incident.target_id, incident.id
        );
        if let Some(steps) = proposed {
            body.push_str("\nproposed actions:");
            for line in steps {
                body.push_str("\n  - ");
                body.push_str(line);
            }
        }

        match tier {
            EscalationTier::Silent => unreachable!(),
            EscalationTier::Summary => {
                self.notifier
                    .synapse(&subject, &body, Priority::Info, Some(&incident.id))
                    .await
            }
            EscalationTier::Plan => {
                self.notifier
                    .synapse(&subject, &body, Priority::Action, Some(&incident.id))
                    .await
            }
            EscalationTier::Operator => {
                self.notifier
                    .synapse(&subject, &body, Priority::Urgent, Some(&incident.id))
                    .await?;
                self.notifier
                    .signal(&format!(
                        "operator action required: {} on {} ({})",
                        incident.anomaly_type.as_str(),
                        incident.target_id,
                        incident.id
                    ))
                    .await
            }
        }
    }
}
