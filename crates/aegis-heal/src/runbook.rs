//! Runbooks: named remediation sequences
//!
//! A runbook row tracks mode, confidence and graduation state; an in-code
//! builder turns an anomaly into concrete steps. Runbooks start in
//! `dry_run` unless whitelisted and graduate to `auto_execute` after N
//! successful dry runs or a manual approval.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use aegis_common::{Error, Result, SharedClock};
use aegis_store::Store;

use crate::anomaly::{AnomalyType, HealthAnomaly};

/// Execution mode of a runbook
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunbookMode {
    DryRun,
    AutoExecute,
}

impl RunbookMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunbookMode::DryRun => "dry_run",
            RunbookMode::AutoExecute => "auto_execute",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "dry_run" => Ok(RunbookMode::DryRun),
            "auto_execute" => Ok(RunbookMode::AutoExecute),
            other => Err(Error::Parse(format!("invalid runbook mode: {}", other))),
        }
    }
}

/// What a step does when executed. Process invocations always pass
/// arguments as a vector; there is no shell interpolation path.
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Spawn an external binary with an argument vector
    Command { program: String, args: Vec<String> },
    /// Terminate a process after re-validating its identity
    KillProcess {
        pid: i64,
        expected_comm: String,
        force: bool,
    },
}

/// One step of a runbook: a value plus describe/execute capabilities
#[derive(Debug, Clone)]
pub struct RunbookStep {
    pub id: String,
    pub description: String,
    pub timeout_ms: u64,
    pub action: StepAction,
}

impl RunbookStep {
    /// Textual description of what execution would do
    pub fn dry_run(&self) -> String {
        match &self.action {
            StepAction::Command { program, args } => {
                format!("{}: would run `{} {}`", self.description, program, args.join(" "))
            }
            StepAction::KillProcess {
                pid,
                expected_comm,
                force,
            } => format!(
                "{}: would send {} to pid {} (expect comm {:?})",
                self.description,
                if *force { "SIGKILL" } else { "SIGTERM" },
                pid,
                expected_comm
            ),
        }
    }
}

/// Outcome status of a single step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
}

/// Execution record for one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step_id: String,
    pub status: StepStatus,
    pub output: String,
    pub artifacts: Vec<String>,
    pub duration_ms: u64,
}

/// One `runbooks` row
#[derive(Debug, Clone)]
pub struct RunbookRow {
    pub id: String,
    pub label: String,
    pub applies_to: Vec<AnomalyType>,
    pub mode: RunbookMode,
    pub confidence: f64,
    pub dry_run_count: i64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub last_succeeded_at: Option<DateTime<Utc>>,
    pub auto_approve_whitelist: bool,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl RunbookRow {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let applies_raw: String = row.try_get("applies_to")?;
        let applies_labels: Vec<String> = serde_json::from_str(&applies_raw)?;
        let applies_to = applies_labels
            .iter()
            .map(|s| AnomalyType::parse(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(RunbookRow {
            id: row.try_get("id")?,
            label: row.try_get("label")?,
            applies_to,
            mode: RunbookMode::parse(row.try_get::<String, _>("mode")?.as_str())?,
            confidence: row.try_get("confidence")?,
            dry_run_count: row.try_get("dry_run_count")?,
            last_executed_at: row.try_get("last_executed_at")?,
            last_succeeded_at: row.try_get("last_succeeded_at")?,
            auto_approve_whitelist: row.try_get("auto_approve_whitelist")?,
            created_at: row.try_get("created_at")?,
            approved_at: row.try_get("approved_at")?,
        })
    }
}

/// In-code half of a runbook: turns an anomaly into executable steps
pub trait RunbookBuilder: Send + Sync {
    fn id(&self) -> &str;
    fn label(&self) -> &str;
    fn applies_to(&self) -> &[AnomalyType];
    /// Whitelisted runbooks start life in `auto_execute`
    fn whitelisted(&self) -> bool {
        false
    }
    fn build(&self, anomaly: &HealthAnomaly) -> Result<Vec<RunbookStep>>;
}

/// Registry of runbooks: persisted rows plus their in-code builders
pub struct RunbookRegistry {
    store: Store,
    clock: SharedClock,
    graduation_dry_runs: u32,
    whitelist: Vec<String>,
    builders: RwLock<HashMap<String, Arc<dyn RunbookBuilder>>>,
}

impl RunbookRegistry {
    pub fn new(
        store: Store,
        clock: SharedClock,
        graduation_dry_runs: u32,
        whitelist: Vec<String>,
    ) -> Self {
        RunbookRegistry {
            store,
            clock,
            graduation_dry_runs,
            whitelist,
            builders: RwLock::new(HashMap::new()),
        }
    }

    /// Register a builder, materializing its row if absent. Whitelisted
    /// runbooks (by builder or configuration) start in `auto_execute`.
    pub async fn register(&self, builder: Arc<dyn RunbookBuilder>) -> Result<()> {
        let whitelisted =
            builder.whitelisted() || self.whitelist.iter().any(|id| id == builder.id());
        let (mode, confidence) = if whitelisted {
            (RunbookMode::AutoExecute, 0.8)
        } else {
            (RunbookMode::DryRun, 0.5)
        };
        let applies: Vec<&str> = builder.applies_to().iter().map(|a| a.as_str()).collect();

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO runbooks
                (id, label, applies_to, mode, confidence, dry_run_count,
                 auto_approve_whitelist, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(builder.id())
        .bind(builder.label())
        .bind(serde_json::to_string(&applies)?)
        .bind(mode.as_str())
        .bind(confidence)
        .bind(whitelisted)
        .bind(self.clock.now())
        .execute(self.store.pool())
        .await?;

        debug!(runbook_id = builder.id(), whitelisted, "runbook registered");
        self.builders
            .write()
            .insert(builder.id().to_string(), builder);
        Ok(())
    }

    /// The runbook for an anomaly type, if one is registered. Ties break
    /// by id for determinism.
    pub async fn get_for_anomaly(
        &self,
        anomaly_type: AnomalyType,
    ) -> Result<Option<(RunbookRow, Arc<dyn RunbookBuilder>)>> {
        let candidate = {
            let builders = self.builders.read();
            let mut matching: Vec<_> = builders
                .values()
                .filter(|b| b.applies_to().contains(&anomaly_type))
                .cloned()
                .collect();
            matching.sort_by(|a, b| a.id().cmp(b.id()));
            matching.into_iter().next()
        };
        match candidate {
            Some(builder) => {
                let row = self.get(builder.id()).await?;
                Ok(Some((row, builder)))
            }
            None => Ok(None),
        }
    }

    /// Fetch a runbook row together with its builder by id
    pub async fn get_with_builder(
        &self,
        id: &str,
    ) -> Result<Option<(RunbookRow, Arc<dyn RunbookBuilder>)>> {
        let builder = self.builders.read().get(id).cloned();
        match builder {
            Some(builder) => Ok(Some((self.get(id).await?, builder))),
            None => Ok(None),
        }
    }

    pub async fn get(&self, id: &str) -> Result<RunbookRow> {
        let row = sqlx::query("SELECT * FROM runbooks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.store.pool())
            .await?
            .ok_or_else(|| Error::Storage(format!("unknown runbook: {}", id)))?;
        RunbookRow::from_row(&row)
    }

    /// Record an execution and apply the graduation rule: after N
    /// successful dry runs the runbook flips to `auto_execute` with
    /// confidence at least 0.8.
    pub async fn record_run(
        &self,
        id: &str,
        mode_ran: RunbookMode,
        success: bool,
    ) -> Result<RunbookRow> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let row = sqlx::query("SELECT * FROM runbooks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::Storage(format!("unknown runbook: {}", id)))?;
        let runbook = RunbookRow::from_row(&row)?;

        let succeeded_at = if success {
            Some(now)
        } else {
            runbook.last_succeeded_at
        };
        let mut dry_run_count = runbook.dry_run_count;
        let mut mode = runbook.mode;
        let mut confidence = runbook.confidence;

        if mode_ran == RunbookMode::DryRun && success {
            dry_run_count += 1;
            if dry_run_count >= self.graduation_dry_runs as i64 && mode == RunbookMode::DryRun {
                mode = RunbookMode::AutoExecute;
                confidence = confidence.max(0.8);
                info!(runbook_id = id, dry_run_count, "runbook graduated to auto_execute");
            }
        }

        sqlx::query(
            r#"
            UPDATE runbooks
            SET mode = ?, confidence = ?, dry_run_count = ?,
                last_executed_at = ?, last_succeeded_at = ?
            WHERE id = ?
            "#,
        )
        .bind(mode.as_str())
        .bind(confidence)
        .bind(dry_run_count)
        .bind(now)
        .bind(succeeded_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get(id).await
    }

    /// Manual approval: immediate graduation regardless of dry-run count
    pub async fn approve(&self, id: &str) -> Result<RunbookRow> {
        let now = self.clock.now();
        sqlx::query(
            r#"
            UPDATE runbooks
            SET mode = 'auto_execute', confidence = MAX(confidence, 0.8), approved_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(self.store.pool())
        .await?;
        self.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::{system_clock, Severity};
    use serde_json::json;

    struct NoopRunbook {
        id: &'static str,
        applies: Vec<AnomalyType>,
        whitelisted: bool,
    }

    impl RunbookBuilder for NoopRunbook {
        fn id(&self) -> &str {
            self.id
        }
        fn label(&self) -> &str {
            "noop"
        }
        fn applies_to(&self) -> &[AnomalyType] {
            &self.applies
        }
        fn whitelisted(&self) -> bool {
            self.whitelisted
        }
        fn build(&self, _anomaly: &HealthAnomaly) -> Result<Vec<RunbookStep>> {
            Ok(vec![RunbookStep {
                id: "noop-1".into(),
                description: "do nothing".into(),
                timeout_ms: 1_000,
                action: StepAction::Command {
                    program: "true".into(),
                    args: vec![],
                },
            }])
        }
    }

    async fn registry() -> RunbookRegistry {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        RunbookRegistry::new(store, system_clock(), 3, vec![])
    }

    fn anomaly(anomaly_type: AnomalyType) -> HealthAnomaly {
        HealthAnomaly {
            id: "anm-1".into(),
            anomaly_type,
            target_id: "t".into(),
            severity: Severity::Medium,
            detected_at: Utc::now(),
            source_id: "heal.test".into(),
            details: json!({}),
            remediation_hint: None,
        }
    }

    #[tokio::test]
    async fn registration_is_idempotent_and_mode_aware() {
        let registry = registry().await;
        registry
            .register(Arc::new(NoopRunbook {
                id: "rb-a",
                applies: vec![AnomalyType::LogBloat],
                whitelisted: false,
            }))
            .await
            .unwrap();
        registry
            .register(Arc::new(NoopRunbook {
                id: "rb-a",
                applies: vec![AnomalyType::LogBloat],
                whitelisted: false,
            }))
            .await
            .unwrap();

        let row = registry.get("rb-a").await.unwrap();
        assert_eq!(row.mode, RunbookMode::DryRun);
        assert_eq!(row.dry_run_count, 0);
    }

    #[tokio::test]
    async fn whitelisted_runbook_starts_auto() {
        let registry = registry().await;
        registry
            .register(Arc::new(NoopRunbook {
                id: "rb-white",
                applies: vec![AnomalyType::DiskPressure],
                whitelisted: true,
            }))
            .await
            .unwrap();
        let row = registry.get("rb-white").await.unwrap();
        assert_eq!(row.mode, RunbookMode::AutoExecute);
        assert!(row.confidence >= 0.8);
    }

    #[tokio::test]
    async fn graduation_after_three_dry_runs() {
        let registry = registry().await;
        registry
            .register(Arc::new(NoopRunbook {
                id: "rb-grad",
                applies: vec![AnomalyType::LogBloat],
                whitelisted: false,
            }))
            .await
            .unwrap();

        for i in 1..=3 {
            let row = registry
                .record_run("rb-grad", RunbookMode::DryRun, true)
                .await
                .unwrap();
            if i < 3 {
                assert_eq!(row.mode, RunbookMode::DryRun, "run {}", i);
            } else {
                assert_eq!(row.mode, RunbookMode::AutoExecute);
                assert!(row.confidence >= 0.8);
            }
        }
    }

    #[tokio::test]
    async fn failed_dry_runs_do_not_graduate() {
        let registry = registry().await;
        registry
            .register(Arc::new(NoopRunbook {
                id: "rb-fail",
                applies: vec![AnomalyType::LogBloat],
                whitelisted: false,
            }))
            .await
            .unwrap();

        for _ in 0..5 {
            registry
                .record_run("rb-fail", RunbookMode::DryRun, false)
                .await
                .unwrap();
        }
        let row = registry.get("rb-fail").await.unwrap();
        assert_eq!(row.mode, RunbookMode::DryRun);
        assert_eq!(row.dry_run_count, 0);
    }

    #[tokio::test]
    async fn lookup_by_anomaly_breaks_ties_by_id() {
        let registry = registry().await;
        registry
            .register(Arc::new(NoopRunbook {
                id: "rb-b",
                applies: vec![AnomalyType::LogBloat],
                whitelisted: false,
            }))
            .await
            .unwrap();
        registry
            .register(Arc::new(NoopRunbook {
                id: "rb-a",
                applies: vec![AnomalyType::LogBloat],
                whitelisted: false,
            }))
            .await
            .unwrap();

        let (row, builder) = registry
            .get_for_anomaly(AnomalyType::LogBloat)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.id, "rb-a");
        assert_eq!(builder.id(), "rb-a");
        assert!(builder.build(&anomaly(AnomalyType::LogBloat)).is_ok());

        assert!(registry
            .get_for_anomaly(AnomalyType::DbCorruption)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn manual_approval_graduates_immediately() {
        let registry = registry().await;
        registry
            .register(Arc::new(NoopRunbook {
                id: "rb-approve",
                applies: vec![AnomalyType::LogBloat],
                whitelisted: false,
            }))
            .await
            .unwrap();
        let row = registry.approve("rb-approve").await.unwrap();
        assert_eq!(row.mode, RunbookMode::AutoExecute);
        assert!(row.approved_at.is_some());
    }
}
