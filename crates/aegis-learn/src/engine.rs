//! Real-time learning engine
//!
//! Non-blocking failure capture: detectors enqueue payloads on the hot
//! path; a single-consumer drain classifies each failure, records it,
//! checks for recurrence and fans propagation out. A failing item is
//! dropped with a warning and the drain continues.

use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use aegis_common::scrub::scrub;
use aegis_common::utils::new_id;
use aegis_common::{
    BoundedQueue, BusEvent, EventBus, LearningConfig, Result, SharedClock,
};
use aegis_notify::Notifier;
use aegis_store::Store;

use crate::classifier;
use crate::detect::Detectors;
use crate::metrics::LearningMetrics;
use crate::propagate::{AtomSink, Propagators};
use crate::recurrence::RecurrenceDetector;
use crate::types::{DetectionPayload, FailureEvent, PropagationStatus, PropagationTarget};

pub struct LearningEngine {
    store: Store,
    bus: EventBus,
    queue: Arc<BoundedQueue<DetectionPayload>>,
    detectors: Arc<Detectors>,
    propagators: Propagators,
    recurrence: RecurrenceDetector,
    subscriber_task: Mutex<Option<JoinHandle<()>>>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl LearningEngine {
    /// Build the engine and warm the hook-pattern suppression cache from
    /// the store.
    pub async fn new(
        store: Store,
        bus: EventBus,
        clock: SharedClock,
        notifier: Arc<dyn Notifier>,
        atom_sink: Arc<dyn AtomSink>,
        config: LearningConfig,
    ) -> Result<Arc<Self>> {
        let queue = Arc::new(BoundedQueue::new(config.queue_depth));
        let detectors = Arc::new(Detectors::new(queue.clone(), clock.clone(), config.clone()));

        let patterns: Vec<String> = sqlx::query_scalar("SELECT pattern FROM hook_patterns")
            .fetch_all(store.pool())
            .await?;
        detectors.load_hook_patterns(&patterns);
        debug!(patterns = patterns.len(), "hook pattern cache warmed");

        Ok(Arc::new(LearningEngine {
            propagators: Propagators::new(
                store.clone(),
                notifier.clone(),
                atom_sink,
                clock.clone(),
                config.clone(),
            ),
            recurrence: RecurrenceDetector::new(store.clone(), notifier, clock, config),
            store,
            bus,
            queue,
            detectors,
            subscriber_task: Mutex::new(None),
            drain_task: Mutex::new(None),
        }))
    }

    /// Direct access for embedders that observe outside the bus
    pub fn detectors(&self) -> &Arc<Detectors> {
        &self.detectors
    }

    pub fn metrics(&self) -> LearningMetrics {
        LearningMetrics::new(self.store.clone())
    }

    /// Subscribe to the bus and start the drain task
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut rx = self.bus.subscribe();
        *self.subscriber_task.lock() = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => engine.dispatch(event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "learning bus subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let engine = Arc::clone(self);
        *self.drain_task.lock() = Some(tokio::spawn(async move {
            while let Some(payload) = engine.queue.pop().await {
                if let Err(e) = engine.process(payload).await {
                    warn!("learning item dropped: {}", e);
                }
            }
            debug!("learning drain finished");
        }));

        info!("real-time learning engine started");
    }

    /// Stop the subscriber, close the queue and let the drain flush what
    /// is already enqueued.
    pub async fn stop(&self) {
        if let Some(task) = self.subscriber_task.lock().take() {
            task.abort();
        }
        self.queue.close();
        let drain = self.drain_task.lock().take();
        if let Some(mut task) = drain {
            if tokio::time::timeout(std::time::Duration::from_secs(5), &mut task)
                .await
                .is_err()
            {
                warn!("learning drain did not flush in time, aborting");
                task.abort();
            }
        }
        info!("real-time learning engine stopped");
    }

    /// Route one bus event to the detector that cares about it. Bounded
    /// time: detectors only touch in-memory state and the queue.
    fn dispatch(&self, event: BusEvent) {
        match event {
            BusEvent::ToolResult {
                session_id,
                tool_name,
                tool_call_id,
                exit_code,
                error,
                at,
            } => self.detectors.observe_tool_result(
                &session_id,
                &tool_name,
                &tool_call_id,
                exit_code,
                error.as_deref(),
                at,
            ),
            BusEvent::UserMessage {
                session_id,
                text,
                at,
            } => self.detectors.observe_user_message(&session_id, &text, at),
            BusEvent::SopEvent {
                sop_id,
                description,
                honored,
                at,
            } => self
                .detectors
                .observe_sop_event(&sop_id, &description, honored, at),
            BusEvent::MilestoneEmitted {
                category,
                milestone,
                old_score,
                new_score,
            } => self
                .detectors
                .observe_milestone(&category, milestone, old_score, new_score),
            BusEvent::PipelineStage {
                pipeline_id,
                stage,
                status,
                at,
            } => self
                .detectors
                .observe_pipeline_stage(&pipeline_id, &stage, &status, at),
            _ => {}
        }
    }

    /// Drain-side processing of one payload: classify, persist, check
    /// recurrence, propagate, announce.
    async fn process(&self, payload: DetectionPayload) -> Result<()> {
        let (root_cause, targets) =
            classifier::classify(payload.kind, &payload.failure_desc);

        let failure = FailureEvent {
            id: new_id("flr"),
            detected_at: payload.detected_at,
            kind: payload.kind,
            tier: payload.tier,
            source: payload.source,
            context: payload.context,
            failure_desc: scrub(&payload.failure_desc),
            raw_input: payload.raw_input.as_deref().map(scrub),
            root_cause: root_cause.clone(),
            propagation_status: PropagationStatus::Pending,
            recurrence_count: 0,
        };

        sqlx::query(
            r#"
            INSERT INTO failure_events
                (id, detected_at, type, tier, source, context, failure_desc,
                 raw_input, root_cause, propagation_status, recurrence_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0)
            "#,
        )
        .bind(&failure.id)
        .bind(failure.detected_at)
        .bind(failure.kind.as_str())
        .bind(failure.tier)
        .bind(&failure.source)
        .bind(failure.context.to_string())
        .bind(&failure.failure_desc)
        .bind(&failure.raw_input)
        .bind(&failure.root_cause)
        .execute(self.store.pool())
        .await?;

        if let Err(e) = self.recurrence.check(&failure).await {
            warn!(failure_id = %failure.id, "recurrence check failed: {}", e);
        }

        let records = self.propagators.propagate(&failure, &targets).await?;
        for record in &records {
            if record.target == PropagationTarget::HookPattern && record.success {
                self.detectors.add_hook_pattern(&record.detail);
            }
        }

        counter!("aegis_learn_failures_total", "kind" => failure.kind.as_str()).increment(1);
        self.bus.publish(BusEvent::FailureDetected {
            failure_id: failure.id.clone(),
            kind: failure.kind,
            root_cause,
        });
        debug!(failure_id = %failure.id, "failure processed");
        Ok(())
    }
}
