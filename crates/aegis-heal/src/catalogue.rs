//! Built-in runbook catalogue
//!
//! Each builder validates every dynamic field against a per-field
//! allowlist regex before it becomes an argument vector. Validation
//! failures fail fast with no side effects.

use once_cell::sync::Lazy;
use regex::Regex;

use aegis_common::{Error, Result};

use crate::anomaly::{AnomalyType, HealthAnomaly};
use crate::runbook::{RunbookBuilder, RunbookStep, StepAction};

static PATH_SAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/[A-Za-z0-9_./-]+$").unwrap());
static UNIT_SAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9@._-]{1,64}$").unwrap());
static TASK_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,63}$").unwrap());
static STAGE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_-]{1,32}$").unwrap());

fn require(pattern: &Regex, value: &str, field: &str) -> Result<()> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "field {} failed allowlist: {:?}",
            field, value
        )))
    }
}

fn detail_str<'a>(anomaly: &'a HealthAnomaly, key: &str) -> Option<&'a str> {
    anomaly.details.get(key).and_then(|v| v.as_str())
}

/// Rotates and prunes log files under the affected directory
pub struct RotateLogsRunbook {
    applies: Vec<AnomalyType>,
}

impl RotateLogsRunbook {
    pub fn new() -> Self {
        RotateLogsRunbook {
            applies: vec![
                AnomalyType::DiskPressure,
                AnomalyType::DiskCritical,
                AnomalyType::LogBloat,
            ],
        }
    }
}

impl Default for RotateLogsRunbook {
    fn default() -> Self {
        Self::new()
    }
}

impl RunbookBuilder for RotateLogsRunbook {
    fn id(&self) -> &str {
        "rb-rotate-logs"
    }
    fn label(&self) -> &str {
        "Rotate and prune logs"
    }
    fn applies_to(&self) -> &[AnomalyType] {
        &self.applies
    }
    fn whitelisted(&self) -> bool {
        true
    }

    fn build(&self, anomaly: &HealthAnomaly) -> Result<Vec<RunbookStep>> {
        let dir = detail_str(anomaly, "log_dir").unwrap_or("/var/log/aegis");
        require(&PATH_SAFE, dir, "log_dir")?;

        Ok(vec![
            RunbookStep {
                id: "measure-usage".into(),
                description: format!("measure {}", dir),
                timeout_ms: 10_000,
                action: StepAction::Command {
                    program: "du".into(),
                    args: vec!["-s".into(), dir.into()],
                },
            },
            RunbookStep {
                id: "prune-rotated".into(),
                description: format!("delete rotated logs older than 3 days in {}", dir),
                timeout_ms: 30_000,
                action: StepAction::Command {
                    program: "find".into(),
                    args: vec![
                        dir.into(),
                        "-name".into(),
                        "*.log.*".into(),
                        "-mtime".into(),
                        "+3".into(),
                        "-delete".into(),
                    ],
                },
            },
        ])
    }
}

/// Restarts a dead managed process or terminates a zombie
pub struct RestartProcessRunbook {
    applies: Vec<AnomalyType>,
}

impl RestartProcessRunbook {
    pub fn new() -> Self {
        RestartProcessRunbook {
            applies: vec![AnomalyType::ProcessDead, AnomalyType::ProcessZombie],
        }
    }
}

impl Default for RestartProcessRunbook {
    fn default() -> Self {
        Self::new()
    }
}

impl RunbookBuilder for RestartProcessRunbook {
    fn id(&self) -> &str {
        "rb-restart-process"
    }
    fn label(&self) -> &str {
        "Restart managed process"
    }
    fn applies_to(&self) -> &[AnomalyType] {
        &self.applies
    }

    fn build(&self, anomaly: &HealthAnomaly) -> Result<Vec<RunbookStep>> {
        match anomaly.anomaly_type {
            AnomalyType::ProcessZombie => {
                let pid = anomaly
                    .details
                    .get("pid")
                    .and_then(|p| p.as_i64())
                    .ok_or_else(|| Error::Validation("zombie anomaly carries no pid".into()))?;
                let comm = detail_str(anomaly, "name")
                    .ok_or_else(|| Error::Validation("zombie anomaly carries no name".into()))?;
                require(&UNIT_SAFE, comm, "name")?;
                Ok(vec![RunbookStep {
                    id: "terminate-zombie".into(),
                    description: format!("terminate zombie {} ({})", comm, pid),
                    timeout_ms: 10_000,
                    action: StepAction::KillProcess {
                        pid,
                        expected_comm: comm.to_string(),
                        force: false,
                    },
                }])
            }
            _ => {
                let unit = detail_str(anomaly, "unit")
                    .or_else(|| detail_str(anomaly, "name"))
                    .ok_or_else(|| Error::Validation("dead-process anomaly carries no unit".into()))?;
                require(&UNIT_SAFE, unit, "unit")?;
                Ok(vec![RunbookStep {
                    id: "restart-unit".into(),
                    description: format!("restart unit {}", unit),
                    timeout_ms: 30_000,
                    action: StepAction::Command {
                        program: "systemctl".into(),
                        args: vec!["restart".into(), unit.to_string()],
                    },
                }])
            }
        }
    }
}

/// Integrity-checks and vacuums a corrupted SQLite database
pub struct VacuumDbRunbook {
    applies: Vec<AnomalyType>,
}

impl VacuumDbRunbook {
    pub fn new() -> Self {
        VacuumDbRunbook {
            applies: vec![AnomalyType::DbCorruption],
        }
    }
}

impl Default for VacuumDbRunbook {
    fn default() -> Self {
        Self::new()
    }
}

impl RunbookBuilder for VacuumDbRunbook {
    fn id(&self) -> &str {
        "rb-vacuum-db"
    }
    fn label(&self) -> &str {
        "Integrity-check and vacuum database"
    }
    fn applies_to(&self) -> &[AnomalyType] {
        &self.applies
    }

    fn build(&self, anomaly: &HealthAnomaly) -> Result<Vec<RunbookStep>> {
        let path = detail_str(anomaly, "path")
            .ok_or_else(|| Error::Validation("db anomaly carries no path".into()))?;
        require(&PATH_SAFE, path, "path")?;

        Ok(vec![
            RunbookStep {
                id: "integrity-check".into(),
                description: format!("integrity check {}", path),
                timeout_ms: 60_000,
                action: StepAction::Command {
                    program: "sqlite3".into(),
                    args: vec![path.to_string(), "PRAGMA integrity_check;".into()],
                },
            },
            RunbookStep {
                id: "vacuum".into(),
                description: format!("vacuum {}", path),
                timeout_ms: 120_000,
                action: StepAction::Command {
                    program: "sqlite3".into(),
                    args: vec![path.to_string(), "VACUUM;".into()],
                },
            },
        ])
    }
}

/// Requeues a stuck pipeline stage
pub struct ClearStuckPipelineRunbook {
    applies: Vec<AnomalyType>,
}

impl ClearStuckPipelineRunbook {
    pub fn new() -> Self {
        ClearStuckPipelineRunbook {
            applies: vec![AnomalyType::PipelineStuck],
        }
    }
}

impl Default for ClearStuckPipelineRunbook {
    fn default() -> Self {
        Self::new()
    }
}

impl RunbookBuilder for ClearStuckPipelineRunbook {
    fn id(&self) -> &str {
        "rb-clear-stuck-pipeline"
    }
    fn label(&self) -> &str {
        "Requeue stuck pipeline stage"
    }
    fn applies_to(&self) -> &[AnomalyType] {
        &self.applies
    }

    fn build(&self, anomaly: &HealthAnomaly) -> Result<Vec<RunbookStep>> {
        let task_id = detail_str(anomaly, "task_id")
            .ok_or_else(|| Error::Validation("stuck-pipeline anomaly carries no task_id".into()))?;
        let stage = detail_str(anomaly, "stage")
            .ok_or_else(|| Error::Validation("stuck-pipeline anomaly carries no stage".into()))?;
        require(&TASK_ID, task_id, "task_id")?;
        require(&STAGE_NAME, stage, "stage")?;

        Ok(vec![RunbookStep {
            id: "requeue-stage".into(),
            description: format!("requeue task {} at stage {}", task_id, stage),
            timeout_ms: 30_000,
            action: StepAction::Command {
                program: "pipelinectl".into(),
                args: vec![
                    "requeue".into(),
                    "--task".into(),
                    task_id.to_string(),
                    "--stage".into(),
                    stage.to_string(),
                ],
            },
        }])
    }
}

/// All built-in builders in registration order
pub fn builtin_runbooks() -> Vec<std::sync::Arc<dyn RunbookBuilder>> {
    vec![
        std::sync::Arc::new(RotateLogsRunbook::new()),
        std::sync::Arc::new(RestartProcessRunbook::new()),
        std::sync::Arc::new(VacuumDbRunbook::new()),
        std::sync::Arc::new(ClearStuckPipelineRunbook::new()),
    ]
}
