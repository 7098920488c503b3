//! Self-healing engine
//!
//! Orchestrates the detect → diagnose → remediate → verify → escalate loop:
//! readings flow in from the probe registry, anomalies dedup into
//! incidents, runbooks execute under confidence/mode policy, and the
//! escalation router decides how loudly to tell the operator.

use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use aegis_common::{EventBus, HealingConfig, Result, SharedClock};
use aegis_notify::Notifier;
use aegis_store::Store;

use crate::anomaly::{AnomalyClassifier, HealthAnomaly, SourceReading};
use crate::catalogue;
use crate::escalation::{determine_tier, EscalationRouter, EscalationTier};
use crate::executor::RunbookExecutor;
use crate::incident::{Incident, IncidentManager, IncidentState, UpsertOutcome};
use crate::probes::{HealthProbe, ProbeRegistry};
use crate::runbook::{RunbookMode, RunbookRegistry};

pub struct HealingEngine {
    config: HealingConfig,
    classifier: AnomalyClassifier,
    incidents: IncidentManager,
    registry: Arc<RunbookRegistry>,
    executor: RunbookExecutor,
    router: EscalationRouter,
    probes: Arc<ProbeRegistry>,
    reading_task: Mutex<Option<JoinHandle<()>>>,
}

impl HealingEngine {
    /// Build the engine and register the built-in runbook catalogue
    pub async fn new(
        store: Store,
        bus: EventBus,
        clock: SharedClock,
        notifier: Arc<dyn Notifier>,
        config: HealingConfig,
    ) -> Result<Arc<Self>> {
        let registry = Arc::new(RunbookRegistry::new(
            store.clone(),
            clock.clone(),
            config.graduation_dry_runs,
            config.auto_approve_whitelist.clone(),
        ));
        for builder in catalogue::builtin_runbooks() {
            registry.register(builder).await?;
        }

        Ok(Arc::new(HealingEngine {
            classifier: AnomalyClassifier::new(config.clone()),
            incidents: IncidentManager::new(store, bus, clock),
            registry,
            executor: RunbookExecutor::new(),
            router: EscalationRouter::new(notifier),
            probes: Arc::new(ProbeRegistry::new()),
            reading_task: Mutex::new(None),
            config,
        }))
    }

    pub fn register_probe(&self, probe: Arc<dyn HealthProbe>) {
        self.probes.register(probe);
    }

    pub fn incidents(&self) -> &IncidentManager {
        &self.incidents
    }

    pub fn runbooks(&self) -> &Arc<RunbookRegistry> {
        &self.registry
    }

    /// Start probe timers and the reading pipeline
    pub fn start(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::channel::<SourceReading>(64);
        self.probes.start(tx);

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(reading) = rx.recv().await {
                if let Err(e) = engine.on_reading(reading).await {
                    warn!("reading pipeline error: {}", e);
                }
            }
        });
        *self.reading_task.lock() = Some(handle);
        info!("self-healing engine started");
    }

    /// Stop probes and the reading pipeline
    pub fn stop(&self) {
        self.probes.stop();
        if let Some(handle) = self.reading_task.lock().take() {
            handle.abort();
        }
        info!("self-healing engine stopped");
    }

    /// Classify one reading and drive any resulting incidents. Serial per
    /// reading; upsert dedup makes concurrent readings for the same pair
    /// converge on one incident.
    pub async fn on_reading(&self, reading: SourceReading) -> Result<()> {
        let anomalies = self.classifier.classify(&reading);
        for anomaly in anomalies {
            counter!(
                "aegis_heal_anomalies_total",
                "type" => anomaly.anomaly_type.as_str()
            )
            .increment(1);

            match self.incidents.upsert(&anomaly).await {
                Ok(UpsertOutcome::Created(incident)) => {
                    if let Err(e) = self.handle_incident(incident, &anomaly).await {
                        warn!(anomaly = %anomaly.anomaly_type, "incident handling failed: {}", e);
                    }
                }
                Ok(UpsertOutcome::Refreshed(incident)) => {
                    debug!(incident_id = %incident.id, "open incident refreshed");
                }
                Ok(UpsertOutcome::Suppressed) => {}
                Err(e) => warn!(anomaly = %anomaly.anomaly_type, "incident upsert failed: {}", e),
            }
        }
        Ok(())
    }

    async fn handle_incident(&self, incident: Incident, anomaly: &HealthAnomaly) -> Result<()> {
        let incident = self
            .incidents
            .transition(&incident.id, IncidentState::Diagnosing, "selecting runbook")
            .await?;

        // The anomaly may have cleared between detection and diagnosis.
        if let Some(true) = self.verify(anomaly).await {
            self.incidents
                .transition(&incident.id, IncidentState::Verifying, "re-probe before action")
                .await?;
            self.incidents
                .transition(
                    &incident.id,
                    IncidentState::SelfResolved,
                    "cleared without action",
                )
                .await?;
            return Ok(());
        }

        let selected = match &incident.runbook_id {
            Some(id) => self.registry.get_with_builder(id).await?,
            None => self.registry.get_for_anomaly(anomaly.anomaly_type).await?,
        };

        let Some((runbook, builder)) = selected else {
            return self
                .escalate(
                    &incident,
                    EscalationTier::Operator,
                    "no runbook available; operator decision needed",
                    None,
                    "no_runbook",
                )
                .await;
        };
        self.incidents.set_runbook(&incident.id, &runbook.id).await?;

        let steps = match builder.build(anomaly) {
            Ok(steps) => steps,
            Err(e) => {
                return self
                    .escalate(
                        &incident,
                        EscalationTier::Operator,
                        &format!("runbook build failed: {}", e),
                        None,
                        "runbook_build_failed",
                    )
                    .await;
            }
        };

        let tier = determine_tier(
            anomaly.severity,
            runbook.mode,
            runbook.confidence,
            self.config.confidence_auto_execute,
            false,
        );

        // Plan and operator tiers publish the proposal and wait; nothing
        // executes without approval.
        if tier >= EscalationTier::Plan {
            let proposed: Vec<String> = steps.iter().map(|s| s.dry_run()).collect();
            let verdict = if tier == EscalationTier::Operator {
                "critical anomaly; operator action required"
            } else {
                "plan proposed; awaiting approval"
            };
            return self
                .escalate(&incident, tier, verdict, Some(&proposed), "awaiting operator")
                .await;
        }

        let incident = self
            .incidents
            .transition(
                &incident.id,
                IncidentState::Remediating,
                &format!("executing {}", runbook.id),
            )
            .await?;

        let report = self.executor.run(&runbook.id, &steps, runbook.mode).await?;
        self.registry
            .record_run(&runbook.id, runbook.mode, report.success)
            .await?;

        if !report.success {
            let failed_tier = determine_tier(
                anomaly.severity,
                runbook.mode,
                runbook.confidence,
                self.config.confidence_auto_execute,
                true,
            );
            return self
                .escalate(
                    &incident,
                    failed_tier,
                    "remediation failed",
                    Some(&report.step_lines()),
                    "remediation_failed",
                )
                .await;
        }

        if runbook.mode == RunbookMode::DryRun {
            // A dry run changes nothing; report what would have happened.
            return self
                .escalate(
                    &incident,
                    EscalationTier::Summary,
                    "dry run completed; no changes applied",
                    Some(&report.step_lines()),
                    "dry_run_reported",
                )
                .await;
        }

        let incident = self
            .incidents
            .transition(&incident.id, IncidentState::Verifying, "re-probing target")
            .await?;

        match self.verify(anomaly).await {
            Some(false) => {
                self.escalate(
                    &incident,
                    EscalationTier::Plan,
                    "remediation executed but anomaly persists",
                    Some(&report.step_lines()),
                    "verification_failed",
                )
                .await
            }
            _ => {
                self.incidents
                    .set_escalation(&incident.id, tier.as_i64())
                    .await?;
                self.router
                    .route(&incident, tier, "remediated and verified", None)
                    .await
                    .unwrap_or_else(|e| warn!("escalation notify failed: {}", e));
                self.incidents
                    .transition(&incident.id, IncidentState::Resolved, "verified healthy")
                    .await?;
                Ok(())
            }
        }
    }

    async fn escalate(
        &self,
        incident: &Incident,
        tier: EscalationTier,
        verdict: &str,
        proposed: Option<&[String]>,
        reason: &str,
    ) -> Result<()> {
        self.incidents
            .set_escalation(&incident.id, tier.as_i64())
            .await?;
        self.router
            .route(incident, tier, verdict, proposed)
            .await
            .unwrap_or_else(|e| warn!("escalation notify failed: {}", e));
        self.incidents
            .transition(&incident.id, IncidentState::Escalated, reason)
            .await?;
        Ok(())
    }

    /// Re-probe the anomaly's source and re-classify.
    /// `Some(true)` = healthy, `Some(false)` = still anomalous,
    /// `None` = no probe registered for this source.
    async fn verify(&self, anomaly: &HealthAnomaly) -> Option<bool> {
        let probe = self.probes.find(&anomaly.source_id)?;
        match tokio::time::timeout(Duration::from_secs(10), probe.poll()).await {
            Ok(Ok(reading)) => {
                let still_present = self.classifier.classify(&reading).into_iter().any(|a| {
                    a.anomaly_type == anomaly.anomaly_type && a.target_id == anomaly.target_id
                });
                Some(!still_present)
            }
            _ => {
                warn!(source_id = %anomaly.source_id, "verification re-probe failed");
                Some(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::{system_clock, Config};
    use aegis_notify::MemoryNotifier;
    use chrono::Utc;
    use serde_json::json;

    async fn engine_with(
        notifier: Arc<MemoryNotifier>,
        config: HealingConfig,
    ) -> (Arc<HealingEngine>, Store) {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let engine = HealingEngine::new(
            store.clone(),
            EventBus::default(),
            system_clock(),
            notifier,
            config,
        )
        .await
        .unwrap();
        (engine, store)
    }

    fn disk_reading(log_dir: &str, usage: f64) -> SourceReading {
        SourceReading {
            source_id: "heal.disk".into(),
            captured_at: Utc::now(),
            freshness_ms: 0,
            data: json!({"mounts": [{"mount": "/", "usage_pct": usage, "log_dir": log_dir}]}),
            available: true,
        }
    }

    #[tokio::test]
    async fn disk_pressure_runs_rotate_logs_to_resolution() {
        let notifier = Arc::new(MemoryNotifier::new());
        let (engine, _store) = engine_with(notifier.clone(), Config::default().healing).await;

        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().to_string_lossy().into_owned();
        engine
            .on_reading(disk_reading(&log_dir, 0.9))
            .await
            .unwrap();

        let incidents = sqlx::query("SELECT * FROM incidents")
            .fetch_all(engine.incidents.store_pool())
            .await
            .unwrap();
        assert_eq!(incidents.len(), 1);
        let incident = crate::incident::Incident::from_row(&incidents[0]).unwrap();
        assert_eq!(incident.state, IncidentState::Resolved);
        assert_eq!(incident.runbook_id.as_deref(), Some("rb-rotate-logs"));
        assert!(incident.resolved_at.is_some());
        // whitelisted confident auto_execute resolves silently
        assert!(incident.escalation_tier.unwrap_or(3) <= 1);
    }

    #[tokio::test]
    async fn critical_anomaly_escalates_without_executing() {
        let notifier = Arc::new(MemoryNotifier::new());
        let (engine, _store) = engine_with(notifier.clone(), Config::default().healing).await;

        let dir = tempfile::tempdir().unwrap();
        engine
            .on_reading(disk_reading(&dir.path().to_string_lossy(), 0.99))
            .await
            .unwrap();

        let incident = engine.incidents.open_incidents().await.unwrap();
        assert_eq!(incident.len(), 1);
        assert_eq!(incident[0].state, IncidentState::Escalated);
        assert_eq!(incident[0].escalation_tier, Some(3));
        // tier 3 rings both transports
        assert_eq!(notifier.synapse_count(), 1);
        assert_eq!(notifier.signal_count(), 1);
    }

    #[tokio::test]
    async fn anomaly_without_runbook_escalates_tier_three() {
        let notifier = Arc::new(MemoryNotifier::new());
        let (engine, _store) = engine_with(notifier.clone(), Config::default().healing).await;

        engine
            .on_reading(SourceReading {
                source_id: "heal.gateway".into(),
                captured_at: Utc::now(),
                freshness_ms: 0,
                data: json!({"reachable": false, "endpoint": "mesh-gw"}),
                available: true,
            })
            .await
            .unwrap();

        let open = engine.incidents.open_incidents().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].state, IncidentState::Escalated);
        assert_eq!(open[0].escalation_tier, Some(3));
        assert!(notifier.synapses.lock()[0].body.contains("no runbook"));
    }

    #[tokio::test]
    async fn critical_db_corruption_forces_operator_tier() {
        let notifier = Arc::new(MemoryNotifier::new());
        let (engine, _store) = engine_with(notifier.clone(), Config::default().healing).await;

        engine
            .on_reading(SourceReading {
                source_id: "heal.db".into(),
                captured_at: Utc::now(),
                freshness_ms: 0,
                data: json!({"integrity_ok": false, "path": "/data/aegis.db"}),
                available: true,
            })
            .await
            .unwrap();

        let open = engine.incidents.open_incidents().await.unwrap();
        // critical severity forces operator tier regardless of runbook mode
        assert_eq!(open[0].escalation_tier, Some(3));
        assert_eq!(open[0].state, IncidentState::Escalated);
    }

    #[tokio::test]
    async fn stuck_pipeline_proposes_plan_awaiting_approval() {
        let notifier = Arc::new(MemoryNotifier::new());
        let (engine, _store) = engine_with(notifier.clone(), Config::default().healing).await;

        engine
            .on_reading(SourceReading {
                source_id: "heal.pipeline".into(),
                captured_at: Utc::now(),
                freshness_ms: 0,
                data: json!({"stages": [
                    {"task_id": "task-7", "stage": "enrich", "stalled_ms": 1_000_000}
                ]}),
                available: true,
            })
            .await
            .unwrap();

        let open = engine.incidents.open_incidents().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].state, IncidentState::Escalated);
        assert_eq!(open[0].escalation_tier, Some(2));

        let captured = notifier.synapses.lock();
        assert_eq!(captured.len(), 1);
        assert!(captured[0].body.contains("proposed actions"));
        assert!(captured[0].body.contains("task-7"));
        // plan tier never touches the signal channel
        assert_eq!(notifier.signal_count(), 0);
    }

    #[tokio::test]
    async fn anomaly_cleared_before_action_self_resolves() {
        use async_trait::async_trait;

        // re-probe always reports the pipeline healthy again
        struct HealthyPipelineProbe;

        #[async_trait]
        impl HealthProbe for HealthyPipelineProbe {
            fn source_id(&self) -> &str {
                "heal.pipeline"
            }
            fn poll_interval_ms(&self) -> u64 {
                60_000
            }
            async fn poll(&self) -> Result<SourceReading> {
                Ok(SourceReading {
                    source_id: "heal.pipeline".into(),
                    captured_at: Utc::now(),
                    freshness_ms: 0,
                    data: json!({"stages": [
                        {"task_id": "task-7", "stage": "enrich", "stalled_ms": 0}
                    ]}),
                    available: true,
                })
            }
        }

        let notifier = Arc::new(MemoryNotifier::new());
        let (engine, _store) = engine_with(notifier.clone(), Config::default().healing).await;
        engine.register_probe(Arc::new(HealthyPipelineProbe));

        engine
            .on_reading(SourceReading {
                source_id: "heal.pipeline".into(),
                captured_at: Utc::now(),
                freshness_ms: 0,
                data: json!({"stages": [
                    {"task_id": "task-7", "stage": "enrich", "stalled_ms": 1_000_000}
                ]}),
                available: true,
            })
            .await
            .unwrap();

        let incidents = sqlx::query("SELECT * FROM incidents")
            .fetch_all(engine.incidents.store_pool())
            .await
            .unwrap();
        assert_eq!(incidents.len(), 1);
        let incident = crate::incident::Incident::from_row(&incidents[0]).unwrap();
        assert_eq!(incident.state, IncidentState::SelfResolved);
        assert!(incident.resolved_at.is_some());
        // cleared without action: nothing executed, nobody notified
        assert_eq!(notifier.synapse_count(), 0);
        assert_eq!(notifier.signal_count(), 0);
    }

    #[tokio::test]
    async fn re_detection_does_not_rerun_handling() {
        let notifier = Arc::new(MemoryNotifier::new());
        let (engine, _store) = engine_with(notifier.clone(), Config::default().healing).await;

        let reading = SourceReading {
            source_id: "heal.pipeline".into(),
            captured_at: Utc::now(),
            freshness_ms: 0,
            data: json!({"stages": [
                {"task_id": "task-7", "stage": "enrich", "stalled_ms": 1_000_000}
            ]}),
            available: true,
        };
        engine.on_reading(reading.clone()).await.unwrap();
        engine.on_reading(reading).await.unwrap();

        // one incident, one notification
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM incidents")
            .fetch_one(engine.incidents.store_pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(notifier.synapse_count(), 1);
    }
}
