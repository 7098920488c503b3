//! Anomaly types and the reading classifier
//!
//! Maps opaque probe readings to typed anomalies. The type set is closed;
//! probes that want new anomaly kinds extend this enum, not the wire
//! format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use aegis_common::utils::new_id;
use aegis_common::{Error, HealingConfig, Result, Severity};

/// Closed set of anomaly kinds the engine knows how to reason about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    SignalStale,
    PhantomPosition,
    FleetUnreachable,
    PipelineStuck,
    ProcessDead,
    ProcessZombie,
    GatewayUnresponsive,
    DbCorruption,
    DiskPressure,
    DiskCritical,
    MemoryPressure,
    MemoryCritical,
    LogBloat,
}

impl AnomalyType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyType::SignalStale => "signal_stale",
            AnomalyType::PhantomPosition => "phantom_position",
            AnomalyType::FleetUnreachable => "fleet_unreachable",
            AnomalyType::PipelineStuck => "pipeline_stuck",
            AnomalyType::ProcessDead => "process_dead",
            AnomalyType::ProcessZombie => "process_zombie",
            AnomalyType::GatewayUnresponsive => "gateway_unresponsive",
            AnomalyType::DbCorruption => "db_corruption",
            AnomalyType::DiskPressure => "disk_pressure",
            AnomalyType::DiskCritical => "disk_critical",
            AnomalyType::MemoryPressure => "memory_pressure",
            AnomalyType::MemoryCritical => "memory_critical",
            AnomalyType::LogBloat => "log_bloat",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "signal_stale" => Ok(AnomalyType::SignalStale),
            "phantom_position" => Ok(AnomalyType::PhantomPosition),
            "fleet_unreachable" => Ok(AnomalyType::FleetUnreachable),
            "pipeline_stuck" => Ok(AnomalyType::PipelineStuck),
            "process_dead" => Ok(AnomalyType::ProcessDead),
            "process_zombie" => Ok(AnomalyType::ProcessZombie),
            "gateway_unresponsive" => Ok(AnomalyType::GatewayUnresponsive),
            "db_corruption" => Ok(AnomalyType::DbCorruption),
            "disk_pressure" => Ok(AnomalyType::DiskPressure),
            "disk_critical" => Ok(AnomalyType::DiskCritical),
            "memory_pressure" => Ok(AnomalyType::MemoryPressure),
            "memory_critical" => Ok(AnomalyType::MemoryCritical),
            "log_bloat" => Ok(AnomalyType::LogBloat),
            other => Err(Error::Parse(format!("invalid anomaly type: {}", other))),
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One poll result from a health probe. `data` is an opaque payload keyed
/// by `source_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReading {
    pub source_id: String,
    pub captured_at: DateTime<Utc>,
    pub freshness_ms: i64,
    pub data: serde_json::Value,
    pub available: bool,
}

/// A typed observation that something is unhealthy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAnomaly {
    pub id: String,
    pub anomaly_type: AnomalyType,
    pub target_id: String,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    pub source_id: String,
    pub details: serde_json::Value,
    pub remediation_hint: Option<String>,
}

impl HealthAnomaly {
    fn new(
        reading: &SourceReading,
        anomaly_type: AnomalyType,
        target_id: impl Into<String>,
        severity: Severity,
        details: serde_json::Value,
        hint: Option<&str>,
    ) -> Self {
        HealthAnomaly {
            id: new_id("anm"),
            anomaly_type,
            target_id: target_id.into(),
            severity,
            detected_at: reading.captured_at,
            source_id: reading.source_id.clone(),
            details,
            remediation_hint: hint.map(str::to_string),
        }
    }
}

/// Threshold-driven mapping from readings to anomalies
pub struct AnomalyClassifier {
    config: HealingConfig,
}

impl AnomalyClassifier {
    pub fn new(config: HealingConfig) -> Self {
        AnomalyClassifier { config }
    }

    /// Classify a reading into zero or more anomalies. An unavailable
    /// reading produces nothing; probe errors are the registry's concern.
    pub fn classify(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        if !reading.available {
            return Vec::new();
        }
        match reading.source_id.as_str() {
            "heal.disk" => self.classify_disk(reading),
            "heal.memory" => self.classify_memory(reading),
            "heal.process" => self.classify_process(reading),
            "heal.signal" => self.classify_signal(reading),
            "heal.pipeline" => self.classify_pipeline(reading),
            "heal.gateway" => self.classify_gateway(reading),
            "heal.db" => self.classify_db(reading),
            "heal.logs" => self.classify_logs(reading),
            "heal.fleet" => self.classify_fleet(reading),
            "heal.positions" => self.classify_positions(reading),
            other => {
                debug!(source_id = other, "no classification rules for source");
                Vec::new()
            }
        }
    }

    fn classify_disk(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        let mut out = Vec::new();
        let mounts = reading
            .data
            .get("mounts")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();
        for entry in mounts {
            let mount = entry
                .get("mount")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
                .to_string();
            let usage = entry
                .get("usage_pct")
                .and_then(|u| u.as_f64())
                .unwrap_or(0.0);
            if usage >= self.config.disk_critical_pct {
                out.push(HealthAnomaly::new(
                    reading,
                    AnomalyType::DiskCritical,
                    mount,
                    Severity::Critical,
                    entry.clone(),
                    Some("free disk space immediately"),
                ));
            } else if usage >= self.config.disk_pressure_pct {
                out.push(HealthAnomaly::new(
                    reading,
                    AnomalyType::DiskPressure,
                    mount,
                    Severity::High,
                    entry.clone(),
                    Some("rotate logs or prune caches"),
                ));
            }
        }
        out
    }

    fn classify_memory(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        let usage = reading
            .data
            .get("usage_pct")
            .and_then(|u| u.as_f64())
            .unwrap_or(0.0);
        if usage >= self.config.memory_critical_pct {
            vec![HealthAnomaly::new(
                reading,
                AnomalyType::MemoryCritical,
                "system",
                Severity::Critical,
                reading.data.clone(),
                Some("identify and restart the leaking process"),
            )]
        } else if usage >= self.config.memory_pressure_pct {
            vec![HealthAnomaly::new(
                reading,
                AnomalyType::MemoryPressure,
                "system",
                Severity::Medium,
                reading.data.clone(),
                None,
            )]
        } else {
            Vec::new()
        }
    }

    fn classify_process(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        let mut out = Vec::new();
        let processes = reading
            .data
            .get("processes")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();
        for entry in processes {
            let name = entry
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("unknown")
                .to_string();
            let state = entry.get("state").and_then(|s| s.as_str()).unwrap_or("");
            let expected = entry
                .get("expected")
                .and_then(|e| e.as_bool())
                .unwrap_or(false);
            let running = entry
                .get("running")
                .and_then(|r| r.as_bool())
                .unwrap_or(false);

            if state == "Z" || state == "zombie" {
                out.push(HealthAnomaly::new(
                    reading,
                    AnomalyType::ProcessZombie,
                    name,
                    Severity::Medium,
                    entry.clone(),
                    Some("reap or terminate the zombie"),
                ));
            } else if expected && !running {
                out.push(HealthAnomaly::new(
                    reading,
                    AnomalyType::ProcessDead,
                    name,
                    Severity::High,
                    entry.clone(),
                    Some("restart the managed unit"),
                ));
            }
        }
        out
    }

    fn classify_signal(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        let age = reading
            .data
            .get("last_message_age_ms")
            .and_then(|a| a.as_i64())
            .unwrap_or(0);
        let channel = reading
            .data
            .get("channel")
            .and_then(|c| c.as_str())
            .unwrap_or("default")
            .to_string();
        if age > self.config.signal_stale_ms {
            vec![HealthAnomaly::new(
                reading,
                AnomalyType::SignalStale,
                channel,
                Severity::Medium,
                reading.data.clone(),
                None,
            )]
        } else {
            Vec::new()
        }
    }

    fn classify_pipeline(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        let mut out = Vec::new();
        let stages = reading
            .data
            .get("stages")
            .and_then(|s| s.as_array())
            .cloned()
            .unwrap_or_default();
        for entry in stages {
            let stage = entry
                .get("stage")
                .and_then(|s| s.as_str())
                .unwrap_or("unknown");
            let task = entry.get("task_id").and_then(|t| t.as_str()).unwrap_or("");
            let stalled = entry
                .get("stalled_ms")
                .and_then(|s| s.as_i64())
                .unwrap_or(0);
            if stalled > self.config.pipeline_stuck_ms {
                out.push(HealthAnomaly::new(
                    reading,
                    AnomalyType::PipelineStuck,
                    format!("{}:{}", task, stage),
                    Severity::High,
                    entry.clone(),
                    Some("requeue the stuck stage"),
                ));
            }
        }
        out
    }

    fn classify_gateway(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        let reachable = reading
            .data
            .get("reachable")
            .and_then(|r| r.as_bool())
            .unwrap_or(true);
        let endpoint = reading
            .data
            .get("endpoint")
            .and_then(|e| e.as_str())
            .unwrap_or("gateway")
            .to_string();
        if reachable {
            Vec::new()
        } else {
            vec![HealthAnomaly::new(
                reading,
                AnomalyType::GatewayUnresponsive,
                endpoint,
                Severity::High,
                reading.data.clone(),
                None,
            )]
        }
    }

    fn classify_db(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        let ok = reading
            .data
            .get("integrity_ok")
            .and_then(|i| i.as_bool())
            .unwrap_or(true);
        let path = reading
            .data
            .get("path")
            .and_then(|p| p.as_str())
            .unwrap_or("db")
            .to_string();
        if ok {
            Vec::new()
        } else {
            vec![HealthAnomaly::new(
                reading,
                AnomalyType::DbCorruption,
                path,
                Severity::Critical,
                reading.data.clone(),
                Some("run integrity check and vacuum"),
            )]
        }
    }

    fn classify_logs(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        let bytes = reading
            .data
            .get("total_bytes")
            .and_then(|b| b.as_i64())
            .unwrap_or(0);
        let dir = reading
            .data
            .get("dir")
            .and_then(|d| d.as_str())
            .unwrap_or("logs")
            .to_string();
        if bytes > self.config.log_bloat_bytes {
            vec![HealthAnomaly::new(
                reading,
                AnomalyType::LogBloat,
                dir,
                Severity::Medium,
                reading.data.clone(),
                Some("rotate and compress old logs"),
            )]
        } else {
            Vec::new()
        }
    }

    fn classify_fleet(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        let mut out = Vec::new();
        let hosts = reading
            .data
            .get("hosts")
            .and_then(|h| h.as_array())
            .cloned()
            .unwrap_or_default();
        for entry in hosts {
            let host = entry
                .get("host")
                .and_then(|h| h.as_str())
                .unwrap_or("unknown")
                .to_string();
            let reachable = entry
                .get("reachable")
                .and_then(|r| r.as_bool())
                .unwrap_or(true);
            if !reachable {
                out.push(HealthAnomaly::new(
                    reading,
                    AnomalyType::FleetUnreachable,
                    host,
                    Severity::High,
                    entry.clone(),
                    None,
                ));
            }
        }
        out
    }

    fn classify_positions(&self, reading: &SourceReading) -> Vec<HealthAnomaly> {
        let mut out = Vec::new();
        let positions = reading
            .data
            .get("positions")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();
        for entry in positions {
            let id = entry
                .get("id")
                .and_then(|i| i.as_str())
                .unwrap_or("unknown")
                .to_string();
            let phantom = entry
                .get("phantom")
                .and_then(|p| p.as_bool())
                .unwrap_or(false);
            if phantom {
                out.push(HealthAnomaly::new(
                    reading,
                    AnomalyType::PhantomPosition,
                    id,
                    Severity::Critical,
                    entry.clone(),
                    Some("reconcile against the exchange"),
                ));
            }
        }
        out
    }
}
