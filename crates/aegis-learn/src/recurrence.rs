//! Recurrence detector
//!
//! After classification, looks back for prior failures with the same root
//! cause. Any prior inside the lookback window bumps the recurrence count
//! and raises an urgent relay referencing it; repeated recurrence also
//! rings the signal channel. `unknown` never recurs.

use std::sync::Arc;

use chrono::Duration;
use metrics::counter;
use tracing::info;

use aegis_common::{LearningConfig, Result, SharedClock};
use aegis_notify::{Notifier, Priority};
use aegis_store::Store;

use crate::types::FailureEvent;

pub struct RecurrenceDetector {
    store: Store,
    notifier: Arc<dyn Notifier>,
    clock: SharedClock,
    config: LearningConfig,
}

impl RecurrenceDetector {
    pub fn new(
        store: Store,
        notifier: Arc<dyn Notifier>,
        clock: SharedClock,
        config: LearningConfig,
    ) -> Self {
        RecurrenceDetector {
            store,
            notifier,
            clock,
            config,
        }
    }

    /// Count prior same-cause failures in the lookback window; on any hit,
    /// update the failure row and escalate. Returns the prior count.
    pub async fn check(&self, failure: &FailureEvent) -> Result<i64> {
        if failure.root_cause == "unknown" {
            return Ok(0);
        }

        let since = self.clock.now() - Duration::seconds(self.config.recurrence_lookback_secs);
        let priors: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM failure_events
            WHERE root_cause = ? AND id != ? AND detected_at >= ?
            "#,
        )
        .bind(&failure.root_cause)
        .bind(&failure.id)
        .bind(since)
        .fetch_one(self.store.pool())
        .await?;

        if priors == 0 {
            return Ok(0);
        }

        sqlx::query("UPDATE failure_events SET recurrence_count = ? WHERE id = ?")
            .bind(priors)
            .bind(&failure.id)
            .execute(self.store.pool())
            .await?;

        counter!("aegis_learn_recurrences_total", "root_cause" => failure.root_cause.clone())
            .increment(1);
        info!(
            failure_id = %failure.id,
            root_cause = %failure.root_cause,
            priors,
            "recurring failure detected"
        );

        self.notifier
            .synapse(
                &format!("[learn] recurring failure: {}", failure.root_cause),
                &format!(
                    "verdict: recurrence\ntarget: {}\nfailure: {}\nseen {} prior occurrence(s) in the lookback window",
                    failure.source, failure.id, priors
                ),
                Priority::Urgent,
                None,
            )
            .await?;

        if priors >= self.config.recurrence_signal_threshold {
            self.notifier
                .signal(&format!(
                    "failure {} keeps recurring ({} priors): {}",
                    failure.root_cause, priors, failure.id
                ))
                .await?;
        }

        Ok(priors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::{system_clock, Config, FailureKind};
    use aegis_notify::MemoryNotifier;
    use chrono::Utc;
    use serde_json::json;

    use crate::types::PropagationStatus;

    async fn seed_failure(store: &Store, id: &str, root_cause: &str, age_secs: i64) {
        sqlx::query(
            r#"
            INSERT INTO failure_events
                (id, detected_at, type, tier, source, context, failure_desc,
                 root_cause, propagation_status, recurrence_count)
            VALUES (?, ?, 'TOOL_ERR', 2, 'tool:exec', '{}', 'desc', ?, 'propagated', 0)
            "#,
        )
        .bind(id)
        .bind(Utc::now() - Duration::seconds(age_secs))
        .bind(root_cause)
        .execute(store.pool())
        .await
        .unwrap();
    }

    fn fresh(id: &str, root_cause: &str) -> FailureEvent {
        FailureEvent {
            id: id.to_string(),
            detected_at: Utc::now(),
            kind: FailureKind::ToolError,
            tier: 2,
            source: "tool:exec".into(),
            context: json!({}),
            failure_desc: "desc".into(),
            raw_input: None,
            root_cause: root_cause.to_string(),
            propagation_status: PropagationStatus::Pending,
            recurrence_count: 0,
        }
    }

    async fn detector() -> (RecurrenceDetector, Store, Arc<MemoryNotifier>) {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let notifier = Arc::new(MemoryNotifier::new());
        (
            RecurrenceDetector::new(
                store.clone(),
                notifier.clone(),
                system_clock(),
                Config::default().learning,
            ),
            store,
            notifier,
        )
    }

    #[tokio::test]
    async fn prior_within_lookback_escalates() {
        let (detector, store, notifier) = detector().await;
        seed_failure(&store, "flr-old", "wrong_path", 3_600).await;
        seed_failure(&store, "flr-new", "wrong_path", 0).await;

        let priors = detector.check(&fresh("flr-new", "wrong_path")).await.unwrap();
        assert_eq!(priors, 1);

        let count: i64 =
            sqlx::query_scalar("SELECT recurrence_count FROM failure_events WHERE id = 'flr-new'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);

        let captured = notifier.synapses.lock();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].priority, Priority::Urgent);
        assert!(captured[0].body.contains("1 prior occurrence"));
        // below the signal threshold
        assert_eq!(notifier.signal_count(), 0);
    }

    #[tokio::test]
    async fn prior_outside_lookback_is_ignored() {
        let (detector, store, notifier) = detector().await;
        seed_failure(&store, "flr-ancient", "wrong_path", 200_000).await;
        seed_failure(&store, "flr-new", "wrong_path", 0).await;

        let priors = detector.check(&fresh("flr-new", "wrong_path")).await.unwrap();
        assert_eq!(priors, 0);
        assert_eq!(notifier.synapse_count(), 0);
    }

    #[tokio::test]
    async fn unknown_never_recurs() {
        let (detector, store, notifier) = detector().await;
        seed_failure(&store, "flr-a", "unknown", 60).await;
        seed_failure(&store, "flr-b", "unknown", 0).await;

        let priors = detector.check(&fresh("flr-b", "unknown")).await.unwrap();
        assert_eq!(priors, 0);
        assert_eq!(notifier.synapse_count(), 0);
    }

    #[tokio::test]
    async fn heavy_recurrence_rings_signal() {
        let (detector, store, notifier) = detector().await;
        for i in 0..3 {
            seed_failure(&store, &format!("flr-{}", i), "timeout", 600 * (i as i64 + 1)).await;
        }
        seed_failure(&store, "flr-new", "timeout", 0).await;

        let priors = detector.check(&fresh("flr-new", "timeout")).await.unwrap();
        assert_eq!(priors, 3);
        assert_eq!(notifier.signal_count(), 1);
    }
}
