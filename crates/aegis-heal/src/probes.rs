//! Health probes and the probe registry
//!
//! Each probe runs on its own periodic timer with a deterministic startup
//! jitter (≤ 5s) so a restart does not stampede every source at once. One
//! probe's latency never delays another; individual probe errors are
//! logged and the registry keeps running.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, warn};

use aegis_common::{Error, Result};

use crate::anomaly::SourceReading;

/// Upper bound on startup jitter
pub const MAX_STARTUP_JITTER_MS: u64 = 5_000;

/// Deadline for a single poll
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Deterministic per-source startup jitter (FNV-1a fold of the id)
pub(crate) fn startup_jitter_ms(source_id: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in source_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash % MAX_STARTUP_JITTER_MS
}

/// A scheduled source of health readings
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn source_id(&self) -> &str;
    fn poll_interval_ms(&self) -> u64;
    async fn poll(&self) -> Result<SourceReading>;
}

/// Schedules registered probes and forwards readings to the engine
pub struct ProbeRegistry {
    probes: Mutex<Vec<Arc<dyn HealthProbe>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        ProbeRegistry {
            probes: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, probe: Arc<dyn HealthProbe>) {
        debug!(source_id = probe.source_id(), "probe registered");
        self.probes.lock().push(probe);
    }

    pub fn find(&self, source_id: &str) -> Option<Arc<dyn HealthProbe>> {
        self.probes
            .lock()
            .iter()
            .find(|p| p.source_id() == source_id)
            .cloned()
    }

    /// Start one timer task per registered probe
    pub fn start(&self, tx: mpsc::Sender<SourceReading>) {
        let probes = self.probes.lock().clone();
        let mut handles = self.handles.lock();
        for probe in probes {
            let tx = tx.clone();
            let jitter = startup_jitter_ms(probe.source_id());
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                let mut ticker = tokio::time::interval(Duration::from_millis(
                    probe.poll_interval_ms().max(100),
                ));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match tokio::time::timeout(POLL_TIMEOUT, probe.poll()).await {
                        Ok(Ok(reading)) => {
                            if tx.send(reading).await.is_err() {
                                break;
                            }
                        }
                        Ok(Err(e)) => {
                            warn!(source_id = probe.source_id(), "probe poll failed: {}", e)
                        }
                        Err(_) => warn!(source_id = probe.source_id(), "probe poll timed out"),
                    }
                }
            }));
        }
    }

    /// Drain all pending timers
    pub fn stop(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProbeRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Disk usage per mount, via `df -P`
pub struct DiskProbe {
    mounts: Vec<String>,
    interval_ms: u64,
}

impl DiskProbe {
    pub fn new(mounts: Vec<String>, interval_ms: u64) -> Self {
        DiskProbe {
            mounts,
            interval_ms,
        }
    }
}

/// Parse POSIX `df -P` output into `(mount, usage_pct)` pairs
pub(crate) fn parse_df_output(output: &str) -> Vec<(String, f64)> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return None;
            }
            let pct = fields[4].trim_end_matches('%').parse::<f64>().ok()? / 100.0;
            Some((fields[5].to_string(), pct))
        })
        .collect()
}

#[async_trait]
impl HealthProbe for DiskProbe {
    fn source_id(&self) -> &str {
        "heal.disk"
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    async fn poll(&self) -> Result<SourceReading> {
        let output = tokio::process::Command::new("df")
            .arg("-P")
            .output()
            .await
            .map_err(|e| Error::External(format!("df failed: {}", e)))?;
        if !output.status.success() {
            return Err(Error::External(format!("df exited with {}", output.status)));
        }

        let parsed = parse_df_output(&String::from_utf8_lossy(&output.stdout));
        let mounts: Vec<serde_json::Value> = parsed
            .into_iter()
            .filter(|(mount, _)| self.mounts.is_empty() || self.mounts.contains(mount))
            .map(|(mount, usage_pct)| json!({"mount": mount, "usage_pct": usage_pct}))
            .collect();

        Ok(SourceReading {
            source_id: self.source_id().to_string(),
            captured_at: Utc::now(),
            freshness_ms: 0,
            data: json!({ "mounts": mounts }),
            available: true,
        })
    }
}

/// System memory pressure from `/proc/meminfo`
pub struct MemoryProbe {
    interval_ms: u64,
}

impl MemoryProbe {
    pub fn new(interval_ms: u64) -> Self {
        MemoryProbe { interval_ms }
    }
}

/// Usage fraction from meminfo text, `1 - MemAvailable / MemTotal`
pub(crate) fn parse_meminfo(text: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        text.lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some(1.0 - available / total)
}

#[async_trait]
impl HealthProbe for MemoryProbe {
    fn source_id(&self) -> &str {
        "heal.memory"
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    async fn poll(&self) -> Result<SourceReading> {
        let text = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .map_err(|e| Error::External(format!("meminfo read failed: {}", e)))?;
        let usage = parse_meminfo(&text)
            .ok_or_else(|| Error::Parse("meminfo missing MemTotal/MemAvailable".into()))?;

        Ok(SourceReading {
            source_id: self.source_id().to_string(),
            captured_at: Utc::now(),
            freshness_ms: 0,
            data: json!({ "usage_pct": usage }),
            available: true,
        })
    }
}

/// A process the process probe watches for liveness
#[derive(Debug, Clone)]
pub struct WatchedProcess {
    /// comm name as it appears in `/proc/<pid>/comm`
    pub name: String,
    /// systemd unit to restart when dead, when managed
    pub unit: Option<String>,
}

/// Liveness and zombie detection for watched processes via `/proc`
pub struct ProcessProbe {
    watched: Vec<WatchedProcess>,
    interval_ms: u64,
}

impl ProcessProbe {
    pub fn new(watched: Vec<WatchedProcess>, interval_ms: u64) -> Self {
        ProcessProbe {
            watched,
            interval_ms,
        }
    }

    async fn scan_proc() -> Vec<(i64, String, String)> {
        let mut found = Vec::new();
        let Ok(mut dir) = tokio::fs::read_dir("/proc").await else {
            return found;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|s| s.parse::<i64>().ok()) else {
                continue;
            };
            let Ok(comm) = tokio::fs::read_to_string(format!("/proc/{}/comm", pid)).await else {
                continue;
            };
            let state = tokio::fs::read_to_string(format!("/proc/{}/stat", pid))
                .await
                .ok()
                .and_then(|stat| {
                    // state is the first field after the parenthesized comm
                    let rest = stat.rsplit(')').next()?;
                    rest.split_whitespace().next().map(str::to_string)
                })
                .unwrap_or_default();
            found.push((pid, comm.trim().to_string(), state));
        }
        found
    }
}

#[async_trait]
impl HealthProbe for ProcessProbe {
    fn source_id(&self) -> &str {
        "heal.process"
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    async fn poll(&self) -> Result<SourceReading> {
        let scanned = Self::scan_proc().await;
        let processes: Vec<serde_json::Value> = self
            .watched
            .iter()
            .map(|watched| {
                let hit = scanned.iter().find(|(_, comm, _)| comm == &watched.name);
                match hit {
                    Some((pid, _, state)) => json!({
                        "name": watched.name,
                        "unit": watched.unit,
                        "pid": pid,
                        "state": state,
                        "expected": true,
                        "running": state != "Z",
                    }),
                    None => json!({
                        "name": watched.name,
                        "unit": watched.unit,
                        "state": "",
                        "expected": true,
                        "running": false,
                    }),
                }
            })
            .collect();

        Ok(SourceReading {
            source_id: self.source_id().to_string(),
            captured_at: Utc::now(),
            freshness_ms: 0,
            data: json!({ "processes": processes }),
            available: true,
        })
    }
}

/// Total size of a log directory tree
pub struct LogDirProbe {
    dir: PathBuf,
    interval_ms: u64,
}

impl LogDirProbe {
    pub fn new(dir: PathBuf, interval_ms: u64) -> Self {
        LogDirProbe { dir, interval_ms }
    }

    fn dir_size(path: &std::path::Path, depth: u32) -> i64 {
        if depth > 6 {
            return 0;
        }
        let Ok(entries) = std::fs::read_dir(path) else {
            return 0;
        };
        let mut total = 0;
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_dir() {
                total += Self::dir_size(&entry.path(), depth + 1);
            } else {
                total += meta.len() as i64;
            }
        }
        total
    }
}

#[async_trait]
impl HealthProbe for LogDirProbe {
    fn source_id(&self) -> &str {
        "heal.logs"
    }

    fn poll_interval_ms(&self) -> u64 {
        self.interval_ms
    }

    async fn poll(&self) -> Result<SourceReading> {
        let dir = self.dir.clone();
        let dir_text = dir.to_string_lossy().into_owned();
        let total = tokio::task::spawn_blocking(move || Self::dir_size(&dir, 0))
            .await
            .map_err(|e| Error::Internal(format!("log scan task failed: {}", e)))?;

        Ok(SourceReading {
            source_id: self.source_id().to_string(),
            captured_at: Utc::now(),
            freshness_ms: 0,
            data: json!({ "dir": dir_text, "total_bytes": total, "log_dir": dir_text }),
            available: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let a = startup_jitter_ms("heal.disk");
        let b = startup_jitter_ms("heal.disk");
        assert_eq!(a, b);
        assert!(a < MAX_STARTUP_JITTER_MS);
        // different sources generally land on different offsets
        assert_ne!(startup_jitter_ms("heal.disk"), startup_jitter_ms("heal.memory"));
    }

    #[test]
    fn df_output_parses_usage() {
        let output = "\
Filesystem     1024-blocks     Used Available Capacity Mounted on
/dev/root         41152832 34882144   6254304      85% /
tmpfs              1024000        0   1024000       0% /dev/shm
";
        let parsed = parse_df_output(output);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "/");
        assert!((parsed[0].1 - 0.85).abs() < 1e-9);
        assert_eq!(parsed[1].1, 0.0);
    }

    #[test]
    fn meminfo_parses_usage_fraction() {
        let text = "\
MemTotal:       16000000 kB
MemFree:         2000000 kB
MemAvailable:    4000000 kB
";
        let usage = parse_meminfo(text).unwrap();
        assert!((usage - 0.75).abs() < 1e-9);
        assert!(parse_meminfo("Garbage: 1 kB").is_none());
    }

    #[tokio::test]
    async fn registry_forwards_readings_and_stops() {
        struct TickProbe;

        #[async_trait]
        impl HealthProbe for TickProbe {
            fn source_id(&self) -> &str {
                "heal.tick"
            }
            fn poll_interval_ms(&self) -> u64 {
                100
            }
            async fn poll(&self) -> Result<SourceReading> {
                Ok(SourceReading {
                    source_id: "heal.tick".into(),
                    captured_at: Utc::now(),
                    freshness_ms: 0,
                    data: json!({}),
                    available: true,
                })
            }
        }

        let registry = ProbeRegistry::new();
        registry.register(Arc::new(TickProbe));
        assert!(registry.find("heal.tick").is_some());
        assert!(registry.find("heal.other").is_none());

        let (tx, mut rx) = mpsc::channel(8);
        registry.start(tx);
        // jitter for this id is below the test deadline; one reading arrives
        let reading = tokio::time::timeout(Duration::from_secs(8), rx.recv())
            .await
            .expect("no reading before deadline")
            .expect("channel closed");
        assert_eq!(reading.source_id, "heal.tick");
        registry.stop();
    }

    #[tokio::test]
    async fn log_dir_probe_measures_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), vec![0u8; 1024]).unwrap();
        std::fs::write(dir.path().join("b.log"), vec![0u8; 512]).unwrap();

        let probe = LogDirProbe::new(dir.path().to_path_buf(), 60_000);
        let reading = probe.poll().await.unwrap();
        assert_eq!(reading.data["total_bytes"].as_i64().unwrap(), 1536);
    }
}
