//! Composition root for the Aegis safety core
//!
//! Wires the shared substrate (store, bus, clock, notifier) into the three
//! engines and owns their lifecycle: everything is acquired in `start()`
//! and released deterministically in `stop()`. Subsystems never reference
//! each other; all cross-subsystem signalling goes over the bus.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use aegis_common::{system_clock, Config, EventBus, OutcomeKind, Result, SharedClock};
use aegis_heal::{DiskProbe, HealingEngine, LogDirProbe, MemoryProbe};
use aegis_learn::{AtomSink, LearningEngine, NullAtomSink};
use aegis_notify::Notifier;
use aegis_store::Store;
use aegis_trust::{Decision, OverrideKind, OverrideRow, Resolution, TrustGate};

/// The assembled cognitive safety core
pub struct SafetyCore {
    config: Config,
    store: Store,
    bus: EventBus,
    gate: Arc<TrustGate>,
    healing: Arc<HealingEngine>,
    learning: Arc<LearningEngine>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl SafetyCore {
    /// Build with the system clock, a config-selected notifier and no
    /// atom store.
    pub async fn build(config: Config) -> Result<Self> {
        let notifier = aegis_notify::from_config(&config.notify)?;
        Self::build_with(config, system_clock(), notifier, Arc::new(NullAtomSink)).await
    }

    /// Build with explicit collaborators. Store corruption or migration
    /// failure here is fatal: the error propagates and the process must
    /// refuse to serve.
    pub async fn build_with(
        config: Config,
        clock: SharedClock,
        notifier: Arc<dyn Notifier>,
        atom_sink: Arc<dyn AtomSink>,
    ) -> Result<Self> {
        let store = Store::open(&config.store).await?;
        let bus = EventBus::new(config.bus.capacity);

        let gate = Arc::new(TrustGate::new(
            store.clone(),
            bus.clone(),
            clock.clone(),
            config.gate.clone(),
        ));
        gate.seed_defaults().await?;

        let healing = HealingEngine::new(
            store.clone(),
            bus.clone(),
            clock.clone(),
            notifier.clone(),
            config.healing.clone(),
        )
        .await?;

        let learning = LearningEngine::new(
            store.clone(),
            bus.clone(),
            clock.clone(),
            notifier,
            atom_sink,
            config.learning.clone(),
        )
        .await?;

        Ok(SafetyCore {
            config,
            store,
            bus,
            gate,
            healing,
            learning,
            reaper: Mutex::new(None),
        })
    }

    /// Register the default probe set: disk, memory and the artifacts log
    /// directory.
    pub fn register_default_probes(&self) {
        self.healing
            .register_probe(Arc::new(DiskProbe::new(vec!["/".into()], 60_000)));
        self.healing
            .register_probe(Arc::new(MemoryProbe::new(30_000)));
        self.healing.register_probe(Arc::new(LogDirProbe::new(
            self.config.learning.artifacts_dir.clone(),
            300_000,
        )));
    }

    /// Start background work: learning drain, probe timers, outcome reaper
    pub fn start(&self) {
        self.learning.start();
        self.healing.start();
        *self.reaper.lock() = Some(self.gate.spawn_reaper());
        info!("safety core started");
    }

    /// Release everything acquired by `start()`, then close the store
    pub async fn stop(&self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        self.healing.stop();
        self.learning.stop().await;
        self.store.close().await;
        info!("safety core stopped");
    }

    /// Gate a tool invocation; see [`TrustGate::check`]
    pub async fn check(
        &self,
        tool_name: &str,
        params: &serde_json::Value,
        session_id: &str,
    ) -> Result<Decision> {
        self.gate.check(tool_name, params, session_id).await
    }

    /// Resolve a decision's outcome; see [`TrustGate::resolve_outcome`]
    pub async fn resolve_outcome(
        &self,
        decision_id: &str,
        outcome: OutcomeKind,
        trigger: &str,
    ) -> Result<Resolution> {
        self.gate.resolve_outcome(decision_id, outcome, trigger).await
    }

    /// Set a manual override; see [`TrustGate::set_override`]
    pub async fn set_override(
        &self,
        category: &str,
        kind: OverrideKind,
        reason: &str,
        granted_by: &str,
        session_id: &str,
        duration: Option<&str>,
    ) -> Result<OverrideRow> {
        self.gate
            .set_override(category, kind, reason, granted_by, session_id, duration)
            .await
    }

    pub fn gate(&self) -> &Arc<TrustGate> {
        &self.gate
    }

    pub fn healing(&self) -> &Arc<HealingEngine> {
        &self.healing
    }

    pub fn learning(&self) -> &Arc<LearningEngine> {
        &self.learning
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
