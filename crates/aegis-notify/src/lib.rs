//! Notification surface for the Aegis safety core
//!
//! Two operator-facing transports, both fire-and-forget from the core's
//! perspective: `synapse` carries routine and escalation traffic, `signal`
//! is reserved for tier-3 and recurrence alerts. Transport internals are
//! out of scope; the core only sees this trait.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use aegis_common::{Error, NotifyConfig, Result};

/// Priority of a synapse message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Info,
    Action,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Info => "info",
            Priority::Action => "action",
            Priority::Urgent => "urgent",
        }
    }
}

/// Operator notification transport
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish an operator-visible message. `thread` groups follow-ups.
    async fn synapse(
        &self,
        subject: &str,
        body: &str,
        priority: Priority,
        thread: Option<&str>,
    ) -> Result<()>;

    /// High-urgency side channel. Tier-3 escalations and recurrence alerts
    /// only.
    async fn signal(&self, body: &str) -> Result<()>;
}

/// Notifier that writes to the tracing log. Default transport when no
/// webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn synapse(
        &self,
        subject: &str,
        body: &str,
        priority: Priority,
        thread: Option<&str>,
    ) -> Result<()> {
        match priority {
            Priority::Info => info!(subject, ?thread, "[SYNAPSE] {}", body),
            Priority::Action => warn!(subject, ?thread, "[SYNAPSE] {}", body),
            Priority::Urgent => error!(subject, ?thread, "[SYNAPSE] {}", body),
        }
        Ok(())
    }

    async fn signal(&self, body: &str) -> Result<()> {
        error!("[SIGNAL] {}", body);
        Ok(())
    }
}

/// Notifier that POSTs JSON payloads to configured webhooks with an
/// explicit deadline per call.
pub struct WebhookNotifier {
    client: reqwest::Client,
    synapse_url: String,
    signal_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let synapse_url = config
            .synapse_webhook_url
            .clone()
            .ok_or_else(|| Error::Config("webhook notifier requires synapse_webhook_url".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Notification(format!("http client: {}", e)))?;

        Ok(WebhookNotifier {
            client,
            synapse_url,
            signal_url: config.signal_webhook_url.clone(),
        })
    }

    async fn post(&self, url: &str, payload: serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("webhook POST timed out: {}", url))
                } else {
                    Error::Notification(format!("webhook POST failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::Notification(format!(
                "webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn synapse(
        &self,
        subject: &str,
        body: &str,
        priority: Priority,
        thread: Option<&str>,
    ) -> Result<()> {
        self.post(
            &self.synapse_url,
            serde_json::json!({
                "subject": subject,
                "body": body,
                "priority": priority.as_str(),
                "thread": thread,
                "sent_at": chrono::Utc::now(),
            }),
        )
        .await
    }

    async fn signal(&self, body: &str) -> Result<()> {
        let url = self
            .signal_url
            .as_deref()
            .ok_or_else(|| Error::Config("signal_webhook_url not configured".into()))?;
        self.post(url, serde_json::json!({ "body": body })).await
    }
}

/// A captured synapse message (test support)
#[derive(Debug, Clone)]
pub struct CapturedSynapse {
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub thread: Option<String>,
}

/// Notifier that collects messages in memory. Used by tests across the
/// workspace to assert on escalation traffic.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    pub synapses: Mutex<Vec<CapturedSynapse>>,
    pub signals: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn synapse_count(&self) -> usize {
        self.synapses.lock().len()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.lock().len()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn synapse(
        &self,
        subject: &str,
        body: &str,
        priority: Priority,
        thread: Option<&str>,
    ) -> Result<()> {
        self.synapses.lock().push(CapturedSynapse {
            subject: subject.to_string(),
            body: body.to_string(),
            priority,
            thread: thread.map(str::to_string),
        });
        Ok(())
    }

    async fn signal(&self, body: &str) -> Result<()> {
        self.signals.lock().push(body.to_string());
        Ok(())
    }
}

/// Build a notifier from configuration
pub fn from_config(config: &NotifyConfig) -> Result<std::sync::Arc<dyn Notifier>> {
    match config.mode.as_str() {
        "log" => Ok(std::sync::Arc::new(LogNotifier)),
        "webhook" => Ok(std::sync::Arc::new(WebhookNotifier::new(config)?)),
        other => Err(Error::Config(format!("unknown notify mode: {}", other))),
    }
}
