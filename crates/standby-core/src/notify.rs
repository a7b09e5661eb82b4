//! Notification dispatch boundary.
//!
//! The engine hands every message to a [`Notifier`] after the state change
//! that produced it has been committed. A delivery outcome never feeds back
//! into the state machine: retryable failures are parked in the `outbox`
//! table and retried by the sweep with exponential backoff, permanent
//! failures are logged and dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::error::Result;
use crate::store::{Store, StoreView};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    Guide { guide_id: String },
    Participants { trip_id: String },
    Operators,
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recipient::Guide { guide_id } => write!(f, "guide:{guide_id}"),
            Recipient::Participants { trip_id } => write!(f, "participants:{trip_id}"),
            Recipient::Operators => f.write_str("operators"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    /// Offer of the backup role, with a response deadline.
    BackupRequest,
    /// The candidate accepted after another guide already took the slot.
    SlotFilled,
    /// An outstanding offer was withdrawn because the trip is covered or gone.
    RequestWithdrawn,
    /// Confirmation to the guide who won the slot.
    BackupConfirmed,
    /// Participants learn who their backup guide is.
    BackupGuideAssigned,
    OperatorBackupAssigned,
    OperatorAlert,
}

impl TemplateId {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateId::BackupRequest => "backup_request",
            TemplateId::SlotFilled => "slot_filled",
            TemplateId::RequestWithdrawn => "request_withdrawn",
            TemplateId::BackupConfirmed => "backup_confirmed",
            TemplateId::BackupGuideAssigned => "backup_guide_assigned",
            TemplateId::OperatorBackupAssigned => "operator_backup_assigned",
            TemplateId::OperatorAlert => "operator_alert",
        }
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub template: TemplateId,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(recipient: Recipient, template: TemplateId, data: serde_json::Value) -> Self {
        Self {
            recipient,
            template,
            data,
        }
    }

    pub fn to_guide(guide_id: &str, template: TemplateId, data: serde_json::Value) -> Self {
        Self::new(
            Recipient::Guide {
                guide_id: guide_id.to_string(),
            },
            template,
            data,
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("retryable delivery failure: {0}")]
    Retryable(String),
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

/// Delivers one message. Implementations must be cheap to share across threads.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> std::result::Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// Notifier implementations
// ---------------------------------------------------------------------------

/// Writes every notification to the log and always succeeds.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> std::result::Result<(), DeliveryError> {
        tracing::info!(
            recipient = %notification.recipient,
            template = %notification.template,
            data = %notification.data,
            "notification"
        );
        Ok(())
    }
}

/// POSTs a JSON envelope to an HTTP endpoint owned by the messaging layer.
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::error::EngineError::InvalidValue(format!("webhook client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, notification: &Notification) -> std::result::Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .map_err(|e| DeliveryError::Retryable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(DeliveryError::Retryable(format!("webhook returned {status}")))
        } else {
            Err(DeliveryError::Permanent(format!("webhook returned {status}")))
        }
    }
}

/// Records deliveries in memory. Failures can be scripted with [`MemoryNotifier::fail_next`].
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failures: Mutex<VecDeque<DeliveryError>>,
}

impl MemoryNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `send` call fail with `err` instead of recording.
    pub fn fail_next(&self, err: DeliveryError) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(err);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_with(&self, template: TemplateId) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.template == template)
            .collect()
    }
}

impl Notifier for MemoryNotifier {
    fn send(&self, notification: &Notification) -> std::result::Result<(), DeliveryError> {
        if let Some(err) = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Err(err);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// A notification waiting for another delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub notification: Notification,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetrySchedule {
    /// Delay before attempt `attempts + 1`, given `attempts` failures so far.
    pub fn backoff(&self, attempts: u32) -> chrono::Duration {
        let exp = attempts.saturating_sub(1).min(20);
        let secs = self
            .base_backoff
            .as_secs()
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff.as_secs());
        chrono::Duration::seconds(secs as i64)
    }
}

impl From<&NotificationConfig> for RetrySchedule {
    fn from(cfg: &NotificationConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_backoff: Duration::from_secs(cfg.base_backoff_secs),
            max_backoff: Duration::from_secs(cfg.max_backoff_secs),
        }
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from(&NotificationConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: u32,
    pub queued: u32,
    pub dropped: u32,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    schedule: RetrySchedule,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, schedule: RetrySchedule) -> Self {
        Self { notifier, schedule }
    }

    /// Deliver a batch produced by one committed transition.
    ///
    /// Never fails: outbox write errors are logged, since the sweep re-derives
    /// state from the store and a lost notice must not undo a transition.
    pub fn dispatch(
        &self,
        store: &Store,
        batch: Vec<Notification>,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if !enabled {
            for n in &batch {
                tracing::debug!(recipient = %n.recipient, template = %n.template, "notifications disabled; skipped");
            }
            return report;
        }
        for notification in batch {
            match self.notifier.send(&notification) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Retryable(reason)) => {
                    let entry = OutboxEntry {
                        id: Uuid::new_v4(),
                        notification,
                        attempts: 1,
                        next_attempt_at: now + self.schedule.backoff(1),
                        last_error: reason,
                        created_at: now,
                    };
                    match enqueue(store, &entry) {
                        Ok(()) => {
                            tracing::warn!(
                                recipient = %entry.notification.recipient,
                                template = %entry.notification.template,
                                error = %entry.last_error,
                                "notification delivery failed; queued for retry"
                            );
                            report.queued += 1;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "could not queue failed notification");
                            report.dropped += 1;
                        }
                    }
                }
                Err(DeliveryError::Permanent(reason)) => {
                    tracing::warn!(
                        recipient = %notification.recipient,
                        template = %notification.template,
                        error = %reason,
                        "notification rejected; dropped"
                    );
                    report.dropped += 1;
                }
            }
        }
        report
    }

    /// Retry every outbox entry whose backoff has elapsed.
    pub fn retry_due(&self, store: &Store, now: DateTime<Utc>) -> Result<DeliveryReport> {
        let due: Vec<OutboxEntry> = store
            .read()?
            .outbox()?
            .into_iter()
            .filter(|e| e.next_attempt_at <= now)
            .collect();

        let mut report = DeliveryReport::default();
        for mut entry in due {
            let outcome = self.notifier.send(&entry.notification);
            let txn = store.write()?;
            match outcome {
                Ok(()) => {
                    txn.remove_outbox(entry.id)?;
                    report.delivered += 1;
                }
                Err(err) => {
                    entry.attempts += 1;
                    entry.last_error = err.to_string();
                    let exhausted = entry.attempts >= self.schedule.max_attempts;
                    if exhausted || matches!(err, DeliveryError::Permanent(_)) {
                        tracing::warn!(
                            recipient = %entry.notification.recipient,
                            template = %entry.notification.template,
                            attempts = entry.attempts,
                            error = %entry.last_error,
                            "giving up on notification"
                        );
                        txn.remove_outbox(entry.id)?;
                        report.dropped += 1;
                    } else {
                        entry.next_attempt_at = now + self.schedule.backoff(entry.attempts);
                        txn.put_outbox(&entry)?;
                        report.queued += 1;
                    }
                }
            }
            txn.commit()?;
        }
        Ok(report)
    }
}

fn enqueue(store: &Store, entry: &OutboxEntry) -> Result<()> {
    let txn = store.write()?;
    txn.put_outbox(entry)?;
    txn.commit()
}
