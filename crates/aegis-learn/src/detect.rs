//! Detection sources
//!
//! Five detectors feed the learning queue. Every observer completes in
//! bounded time: it matches a few regexes against in-memory state,
//! enqueues a payload and returns. All storage happens later, off the
//! critical path, in the drain task.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::json;
use tracing::{debug, warn};

use aegis_common::{BoundedQueue, FailureKind, LearningConfig, MilestoneKind, SharedClock};

use crate::types::DetectionPayload;

/// Correction phrases scanned in user messages
static CORRECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\bthat'?s wrong\b").unwrap(),
        Regex::new(r"(?i)\bthat is wrong\b").unwrap(),
        Regex::new(r"(?i)\buse \S{1,40} instead\b").unwrap(),
        Regex::new(r"(?i)\boutdated\b").unwrap(),
        Regex::new(r"(?i)\bnot correct\b").unwrap(),
        Regex::new(r"(?i)\bshould (?:be|use) \S{1,40},? not \S{1,40}\b").unwrap(),
    ]
});

/// Remove fenced code blocks and quoted lines before scanning
fn strip_correction_noise(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_fence = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || trimmed.starts_with('>') {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone)]
struct ToolCallRecord {
    session_id: String,
    tool_name: String,
    tool_call_id: String,
    at: DateTime<Utc>,
}

const RECENT_TOOL_CAP: usize = 64;
const RECENT_CORRECTION_CAP: usize = 64;

/// The five detection sources, sharing one bounded queue
pub struct Detectors {
    queue: Arc<BoundedQueue<DetectionPayload>>,
    clock: SharedClock,
    config: LearningConfig,
    recent_tools: Mutex<VecDeque<ToolCallRecord>>,
    recent_corrections: Mutex<VecDeque<(String, DateTime<Utc>)>>,
    hook_patterns: RwLock<Vec<Regex>>,
}

impl Detectors {
    pub fn new(
        queue: Arc<BoundedQueue<DetectionPayload>>,
        clock: SharedClock,
        config: LearningConfig,
    ) -> Self {
        Detectors {
            queue,
            clock,
            config,
            recent_tools: Mutex::new(VecDeque::with_capacity(RECENT_TOOL_CAP)),
            recent_corrections: Mutex::new(VecDeque::with_capacity(RECENT_CORRECTION_CAP)),
            hook_patterns: RwLock::new(Vec::new()),
        }
    }

    /// Install learned hook patterns; matching tool errors are suppressed
    /// because the failure class is already captured.
    pub fn load_hook_patterns(&self, patterns: &[String]) {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            match Regex::new(pattern) {
                Ok(regex) => compiled.push(regex),
                Err(e) => warn!(pattern, "invalid hook pattern skipped: {}", e),
            }
        }
        *self.hook_patterns.write() = compiled;
    }

    pub fn add_hook_pattern(&self, pattern: &str) {
        match Regex::new(pattern) {
            Ok(regex) => self.hook_patterns.write().push(regex),
            Err(e) => warn!(pattern, "invalid hook pattern skipped: {}", e),
        }
    }

    /// Tool-result observer: records the call for correction correlation
    /// and raises a TOOL_ERR payload on failure.
    pub fn observe_tool_result(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_call_id: &str,
        exit_code: Option<i64>,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) {
        {
            let mut recent = self.recent_tools.lock();
            if recent.len() >= RECENT_TOOL_CAP {
                recent.pop_front();
            }
            recent.push_back(ToolCallRecord {
                session_id: session_id.to_string(),
                tool_name: tool_name.to_string(),
                tool_call_id: tool_call_id.to_string(),
                at,
            });
        }

        let failed = matches!(exit_code, Some(code) if code != 0) || error.is_some();
        if !failed {
            return;
        }
        let desc = match error {
            Some(e) => e.to_string(),
            None => format!("tool {} exited with {}", tool_name, exit_code.unwrap_or(-1)),
        };

        if self.hook_patterns.read().iter().any(|p| p.is_match(&desc)) {
            counter!("aegis_learn_suppressed_total").increment(1);
            debug!(tool_name, "tool error matched a learned hook pattern, suppressed");
            return;
        }

        self.enqueue(DetectionPayload {
            kind: FailureKind::ToolError,
            tier: 2,
            source: format!("tool:{}", tool_name),
            context: json!({
                "session_id": session_id,
                "tool_call_id": tool_call_id,
                "exit_code": exit_code,
            }),
            failure_desc: desc,
            raw_input: None,
            detected_at: at,
        });
    }

    /// Correction scanner: fires only when a correction phrase survives
    /// fence/quote stripping AND a tool call happened within the window.
    pub fn observe_user_message(&self, session_id: &str, text: &str, at: DateTime<Utc>) {
        let cleaned = strip_correction_noise(text);
        if !CORRECTION_PATTERNS.iter().any(|p| p.is_match(&cleaned)) {
            return;
        }

        let correlated = {
            let window = chrono::Duration::seconds(self.config.correction_window_secs);
            let recent = self.recent_tools.lock();
            recent
                .iter()
                .rev()
                .find(|r| r.session_id == session_id && at - r.at <= window && r.at <= at)
                .cloned()
        };
        let Some(tool_call) = correlated else {
            debug!("correction phrase without a recent tool call, ignored");
            return;
        };

        // identical correction text inside the dedup window is one event
        let normalized = cleaned.trim().to_ascii_lowercase();
        {
            let dedup_window = chrono::Duration::seconds(self.config.dedup_window_secs);
            let mut seen = self.recent_corrections.lock();
            if seen
                .iter()
                .any(|(prior, prior_at)| prior == &normalized && at - *prior_at <= dedup_window)
            {
                debug!("duplicate correction within dedup window, ignored");
                return;
            }
            if seen.len() >= RECENT_CORRECTION_CAP {
                seen.pop_front();
            }
            seen.push_back((normalized, at));
        }

        self.enqueue(DetectionPayload {
            kind: FailureKind::Correction,
            tier: 2,
            source: format!("session:{}", session_id),
            context: json!({
                "tool_call_id": tool_call.tool_call_id,
                "tool_name": tool_call.tool_name,
            }),
            failure_desc: cleaned.trim().to_string(),
            raw_input: Some(text.to_string()),
            detected_at: at,
        });
    }

    /// SOP hook observer: a hook that would have been honored but was not
    pub fn observe_sop_event(&self, sop_id: &str, description: &str, honored: bool, at: DateTime<Utc>) {
        if honored {
            return;
        }
        self.enqueue(DetectionPayload {
            kind: FailureKind::SopViolation,
            tier: 2,
            source: format!("sop:{}", sop_id),
            context: json!({ "sop_id": sop_id }),
            failure_desc: format!("SOP {} violated: {}", sop_id, description),
            raw_input: None,
            detected_at: at,
        });
    }

    /// Trust milestone observer: demotions and blocks become failures
    pub fn observe_milestone(
        &self,
        category: &str,
        milestone: MilestoneKind,
        old_score: f64,
        new_score: f64,
    ) {
        if !matches!(milestone, MilestoneKind::TierDemotion | MilestoneKind::Blocked) {
            return;
        }
        self.enqueue(DetectionPayload {
            kind: FailureKind::TrustDemotion,
            tier: 3,
            source: format!("trust:{}", category),
            context: json!({
                "category": category,
                "milestone": milestone.as_str(),
                "old_score": old_score,
                "new_score": new_score,
            }),
            failure_desc: format!(
                "trust {} for {} ({:.2} -> {:.2})",
                milestone.as_str(),
                category,
                old_score,
                new_score
            ),
            raw_input: None,
            detected_at: self.clock.now(),
        });
    }

    /// Pipeline stage observer: fail/block transitions become failures
    pub fn observe_pipeline_stage(
        &self,
        pipeline_id: &str,
        stage: &str,
        status: &str,
        at: DateTime<Utc>,
    ) {
        if !matches!(status, "failed" | "blocked") {
            return;
        }
        self.enqueue(DetectionPayload {
            kind: FailureKind::PipelineFailure,
            tier: 3,
            source: format!("pipeline:{}", pipeline_id),
            context: json!({ "pipeline_id": pipeline_id, "stage": stage, "status": status }),
            failure_desc: format!("pipeline {} stage {} {}", pipeline_id, stage, status),
            raw_input: None,
            detected_at: at,
        });
    }

    fn enqueue(&self, payload: DetectionPayload) {
        counter!("aegis_learn_detections_total", "kind" => payload.kind.as_str()).increment(1);
        if !self.queue.push(payload) {
            warn!("learning queue closed, detection dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::{system_clock, Config};

    fn detectors() -> (Detectors, Arc<BoundedQueue<DetectionPayload>>) {
        let queue = Arc::new(BoundedQueue::new(32));
        (
            Detectors::new(queue.clone(), system_clock(), Config::default().learning),
            queue,
        )
    }

    #[test]
    fn tool_error_enqueues_payload() {
        let (detectors, queue) = detectors();
        detectors.observe_tool_result(
            "s1",
            "exec",
            "tc1",
            Some(1),
            Some("cat: /tmp/x: No such file or directory"),
            Utc::now(),
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn successful_tool_result_is_quiet() {
        let (detectors, queue) = detectors();
        detectors.observe_tool_result("s1", "exec", "tc1", Some(0), None, Utc::now());
        assert!(queue.is_empty());
    }

    #[test]
    fn hook_pattern_suppresses_known_failure() {
        let (detectors, queue) = detectors();
        detectors.load_hook_patterns(&[r"No such file or directory".to_string()]);
        detectors.observe_tool_result(
            "s1",
            "exec",
            "tc1",
            Some(1),
            Some("cat: /tmp/x: No such file or directory"),
            Utc::now(),
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn correction_fires_after_tool_call() {
        let (detectors, queue) = detectors();
        let now = Utc::now();
        detectors.observe_tool_result("s1", "exec", "tc1", Some(0), None, now);
        detectors.observe_user_message("s1", "that's wrong, should be pnpm not npm", now);

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn correction_without_tool_call_is_ignored() {
        let (detectors, queue) = detectors();
        detectors.observe_user_message("s1", "that's wrong", Utc::now());
        assert!(queue.is_empty());
    }

    #[test]
    fn correction_outside_window_is_ignored() {
        let (detectors, queue) = detectors();
        let long_ago = Utc::now() - chrono::Duration::hours(2);
        detectors.observe_tool_result("s1", "exec", "tc1", Some(0), None, long_ago);
        detectors.observe_user_message("s1", "that's wrong", Utc::now());
        assert!(queue.is_empty());
    }

    #[test]
    fn correction_in_code_fence_is_ignored() {
        let (detectors, queue) = detectors();
        let now = Utc::now();
        detectors.observe_tool_result("s1", "exec", "tc1", Some(0), None, now);
        detectors.observe_user_message(
            "s1",
            "look at this test:\n```\nassert(\"that's wrong\");\n```\nneat",
            now,
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn quoted_correction_is_ignored() {
        let (detectors, queue) = detectors();
        let now = Utc::now();
        detectors.observe_tool_result("s1", "exec", "tc1", Some(0), None, now);
        detectors.observe_user_message("s1", "> that's wrong\njust quoting the bot", now);
        assert!(queue.is_empty());
    }

    #[test]
    fn duplicate_correction_dedups() {
        let (detectors, queue) = detectors();
        let now = Utc::now();
        detectors.observe_tool_result("s1", "exec", "tc1", Some(0), None, now);
        detectors.observe_user_message("s1", "that's wrong, should be pnpm not npm", now);
        detectors.observe_user_message("s1", "that's wrong, should be pnpm not npm", now);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn sop_honored_is_quiet_violation_fires() {
        let (detectors, queue) = detectors();
        detectors.observe_sop_event("sop-7", "review before deploy", true, Utc::now());
        assert!(queue.is_empty());
        detectors.observe_sop_event("sop-7", "review before deploy", false, Utc::now());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn only_demotion_milestones_fire() {
        let (detectors, queue) = detectors();
        detectors.observe_milestone("write_file", MilestoneKind::TierPromotion, 0.7, 0.8);
        detectors.observe_milestone("write_file", MilestoneKind::FirstAutoApprove, 0.8, 0.8);
        assert!(queue.is_empty());

        detectors.observe_milestone("write_file", MilestoneKind::TierDemotion, 0.8, 0.6);
        detectors.observe_milestone("write_file", MilestoneKind::Blocked, 0.6, 0.2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn pipeline_fail_and_block_fire() {
        let (detectors, queue) = detectors();
        detectors.observe_pipeline_stage("pl-1", "enrich", "running", Utc::now());
        assert!(queue.is_empty());
        detectors.observe_pipeline_stage("pl-1", "enrich", "failed", Utc::now());
        detectors.observe_pipeline_stage("pl-1", "publish", "blocked", Utc::now());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn fence_stripping_keeps_prose() {
        let stripped = strip_correction_noise("before\n```rust\ncode here\n```\nafter");
        assert!(stripped.contains("before"));
        assert!(stripped.contains("after"));
        assert!(!stripped.contains("code here"));
    }
}
