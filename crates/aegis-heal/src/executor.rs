//! Runbook executor
//!
//! Runs steps under mode policy. In `dry_run` mode every step's execution
//! is replaced by its description; in `auto_execute` mode each step runs
//! with its declared timeout and a failed step aborts the sequence.
//! Process-killing steps re-validate their target through
//! `/proc/<pid>/comm` at the moment of action.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use aegis_common::{Error, Result};

use crate::runbook::{RunbookMode, RunbookStep, StepAction, StepReport, StepStatus};

/// Valid PID shapes: never 0 or 1
static PID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[2-9]\d*$|^1\d+$").unwrap());

/// Result of running one runbook
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub runbook_id: String,
    pub mode: RunbookMode,
    pub steps: Vec<StepReport>,
    pub success: bool,
}

impl ExecutionReport {
    /// Human-readable step lines for escalation messages
    pub fn step_lines(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|s| {
                format!(
                    "[{}] {}: {}",
                    match s.status {
                        StepStatus::Success => "ok",
                        StepStatus::Failed => "failed",
                    },
                    s.step_id,
                    s.output
                )
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct RunbookExecutor;

impl RunbookExecutor {
    pub fn new() -> Self {
        RunbookExecutor
    }

    /// Run all steps under the given mode. Steps with `timeout_ms == 0`
    /// are invalid and rejected before anything runs.
    pub async fn run(
        &self,
        runbook_id: &str,
        steps: &[RunbookStep],
        mode: RunbookMode,
    ) -> Result<ExecutionReport> {
        for step in steps {
            if step.timeout_ms == 0 {
                return Err(Error::Validation(format!(
                    "step {} declares a zero timeout",
                    step.id
                )));
            }
        }

        let mut reports = Vec::with_capacity(steps.len());
        let mut success = true;

        for step in steps {
            let report = match mode {
                RunbookMode::DryRun => StepReport {
                    step_id: step.id.clone(),
                    status: StepStatus::Success,
                    output: step.dry_run(),
                    artifacts: Vec::new(),
                    duration_ms: 0,
                },
                RunbookMode::AutoExecute => self.execute_step(step).await,
            };

            let failed = report.status == StepStatus::Failed;
            reports.push(report);
            if failed {
                warn!(
                    runbook_id,
                    step_id = %step.id,
                    "step failed, aborting runbook"
                );
                success = false;
                break;
            }
        }

        Ok(ExecutionReport {
            runbook_id: runbook_id.to_string(),
            mode,
            steps: reports,
            success,
        })
    }

    async fn execute_step(&self, step: &RunbookStep) -> StepReport {
        let started = Instant::now();
        debug!(step_id = %step.id, "executing step");

        let outcome = timeout(
            Duration::from_millis(step.timeout_ms),
            execute_action(&step.action),
        )
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(output)) => StepReport {
                step_id: step.id.clone(),
                status: StepStatus::Success,
                output,
                artifacts: Vec::new(),
                duration_ms,
            },
            Ok(Err(e)) => StepReport {
                step_id: step.id.clone(),
                status: StepStatus::Failed,
                output: e.to_string(),
                artifacts: Vec::new(),
                duration_ms,
            },
            Err(_) => StepReport {
                step_id: step.id.clone(),
                status: StepStatus::Failed,
                output: format!("timed out after {}ms", step.timeout_ms),
                artifacts: Vec::new(),
                duration_ms,
            },
        }
    }
}

async fn execute_action(action: &StepAction) -> Result<String> {
    match action {
        StepAction::Command { program, args } => run_command(program, args).await,
        StepAction::KillProcess {
            pid,
            expected_comm,
            force,
        } => kill_process(*pid, expected_comm, *force).await,
    }
}

/// Argument-vector process execution; no shell is involved
async fn run_command(program: &str, args: &[String]) -> Result<String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::External(format!("failed to spawn {}: {}", program, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::External(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )))
    }
}

/// Terminate a process, re-reading `/proc/<pid>/comm` immediately before
/// the signal so a recycled PID is never killed by mistake.
async fn kill_process(pid: i64, expected_comm: &str, force: bool) -> Result<String> {
    let pid_text = pid.to_string();
    if !PID_PATTERN.is_match(&pid_text) {
        return Err(Error::Validation(format!("refusing to signal pid {}", pid)));
    }

    let comm_path = format!("/proc/{}/comm", pid);
    let comm = tokio::fs::read_to_string(&comm_path)
        .await
        .map_err(|e| Error::External(format!("cannot read {}: {}", comm_path, e)))?;
    let comm = comm.trim();
    if comm != expected_comm {
        return Err(Error::Validation(format!(
            "pid {} is now {:?}, expected {:?}; aborting kill",
            pid, comm, expected_comm
        )));
    }

    let signal = if force { "-KILL" } else { "-TERM" };
    run_command("kill", &[signal.to_string(), pid_text]).await?;
    Ok(format!("sent {} to pid {} ({})", signal, pid, comm))
}
