//! Configuration for the Aegis safety core

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub store: StoreConfig,
    pub bus: BusConfig,
    pub gate: GateConfig,
    pub healing: HealingConfig,
    pub learning: LearningConfig,
    pub notify: NotifyConfig,
}

/// Embedded store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StoreConfig {
    /// SQLite database path; `:memory:` for an ephemeral store
    pub path: PathBuf,
    /// How long a writer waits on a locked database before erroring
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("./aegis.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BusConfig {
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig { capacity: 256 }
    }
}

/// Trust gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GateConfig {
    /// Feedback window for pass decisions before the outcome defaults to pass
    pub feedback_window_secs: u64,
    /// Interval of the pending-outcome reaper task
    pub reaper_interval_secs: u64,
    /// Session-id prefixes that may never grant or revoke overrides
    pub non_interactive_prefixes: Vec<String>,
    /// Max characters kept in the scrubbed params summary
    pub max_summary_chars: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            feedback_window_secs: 300,
            reaper_interval_secs: 60,
            non_interactive_prefixes: vec![
                "pipeline".to_string(),
                "subagent".to_string(),
                "isolated".to_string(),
            ],
            max_summary_chars: 400,
        }
    }
}

/// Self-healing engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HealingConfig {
    /// Confidence at or above which an auto_execute runbook runs silently
    pub confidence_auto_execute: f64,
    /// Successful dry runs required before a runbook graduates
    pub graduation_dry_runs: u32,
    /// Default dismissal window when an operator dismisses an incident
    pub dismiss_default_secs: u64,
    /// Runbook ids allowed to start in auto_execute mode
    pub auto_approve_whitelist: Vec<String>,
    /// Disk usage fraction that raises disk_pressure
    pub disk_pressure_pct: f64,
    /// Disk usage fraction that raises disk_critical
    pub disk_critical_pct: f64,
    /// Memory usage fraction that raises memory_pressure
    pub memory_pressure_pct: f64,
    /// Memory usage fraction that raises memory_critical
    pub memory_critical_pct: f64,
    /// Signal-source silence that raises signal_stale
    pub signal_stale_ms: i64,
    /// Pipeline stage dwell that raises pipeline_stuck
    pub pipeline_stuck_ms: i64,
    /// Log directory size that raises log_bloat
    pub log_bloat_bytes: i64,
    /// Default per-step timeout when a step declares none sensible
    pub default_step_timeout_ms: u64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        HealingConfig {
            confidence_auto_execute: 0.8,
            graduation_dry_runs: 3,
            dismiss_default_secs: 3_600,
            auto_approve_whitelist: vec!["rb-rotate-logs".to_string()],
            disk_pressure_pct: 0.85,
            disk_critical_pct: 0.95,
            memory_pressure_pct: 0.85,
            memory_critical_pct: 0.95,
            signal_stale_ms: 300_000,
            pipeline_stuck_ms: 900_000,
            log_bloat_bytes: 2_147_483_648,
            default_step_timeout_ms: 30_000,
        }
    }
}

/// Real-time learning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LearningConfig {
    /// Bounded queue depth; overflow drops the oldest pending item
    pub queue_depth: usize,
    /// A correction only counts when a tool call happened within this window
    pub correction_window_secs: i64,
    /// Identical correction text within this window produces one event
    pub dedup_window_secs: i64,
    /// Recurrence lookback for matching prior root causes
    pub recurrence_lookback_secs: i64,
    /// Recurrence count at which a signal alert accompanies the urgent relay
    pub recurrence_signal_threshold: i64,
    /// Directory for durable artifacts (SOP patch drafts, regression stubs)
    pub artifacts_dir: PathBuf,
}

impl Default for LearningConfig {
    fn default() -> Self {
        LearningConfig {
            queue_depth: 512,
            correction_window_secs: 120,
            dedup_window_secs: 600,
            recurrence_lookback_secs: 86_400,
            recurrence_signal_threshold: 3,
            artifacts_dir: PathBuf::from("./artifacts"),
        }
    }
}

/// Notification transport selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NotifyConfig {
    /// `log` or `webhook`
    pub mode: String,
    pub synapse_webhook_url: Option<String>,
    pub signal_webhook_url: Option<String>,
    /// Deadline for a single webhook POST
    pub timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            mode: "log".to_string(),
            synapse_webhook_url: None,
            signal_webhook_url: None,
            timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Missing sections fall back to
    /// defaults; unknown fields are rejected.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.gate.feedback_window_secs, 300);
        assert!(cfg.healing.disk_pressure_pct < cfg.healing.disk_critical_pct);
        assert_eq!(cfg.notify.mode, "log");
        assert!(cfg
            .gate
            .non_interactive_prefixes
            .contains(&"pipeline".to_string()));
    }

    #[test]
    fn partial_toml_merges_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[gate]\nfeedback_window_secs = 60\n\n[learning]\nqueue_depth = 32\n"
        )
        .unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.gate.feedback_window_secs, 60);
        assert_eq!(cfg.learning.queue_depth, 32);
        // untouched section keeps defaults
        assert_eq!(cfg.healing.graduation_dry_runs, 3);
    }

    #[test]
    fn unknown_fields_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gate]\nfeedack_window_secs = 60\n").unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
