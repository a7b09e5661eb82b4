//! Operator alert queue: raised when automation cannot cover a trip.
//!
//! There is at most one open alert per (trip, alert type). Escalating again
//! while that alert is open returns the existing alert instead of inserting a
//! second one; the lookup happens before the insert, inside the same write
//! transaction as the transition that escalated.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::notify::{Notification, Recipient, TemplateId};
use crate::policy::AutomationPolicy;
use crate::store::{Store, StoreView, WriteTxn};
use crate::types::Trip;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Automatic assignment is switched off by policy.
    AutomationDisabled,
    /// No eligible candidate is left to ask.
    NoCandidates,
    /// The per-trip request budget is spent.
    RequestsExhausted,
    /// Stored state breaks the single-assignment invariant.
    InconsistentState,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::AutomationDisabled => "automation_disabled",
            AlertType::NoCandidates => "no_candidates",
            AlertType::RequestsExhausted => "requests_exhausted",
            AlertType::InconsistentState => "inconsistent_state",
        }
    }

    /// Raised by the assignment workflow itself, and cleared by it once the
    /// trip moves on. Inconsistencies stay open until an operator looks.
    pub fn is_workflow_cause(self) -> bool {
        !matches!(self, AlertType::InconsistentState)
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    /// `critical` under 24h to trip start, `high` under 7 days, else `medium`.
    /// Trips that already started count as critical.
    pub fn for_start(starts_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining = starts_at - now;
        if remaining < Duration::hours(24) {
            AlertPriority::Critical
        } else if remaining < Duration::days(7) {
            AlertPriority::High
        } else {
            AlertPriority::Medium
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertPriority::Medium => "medium",
            AlertPriority::High => "high",
            AlertPriority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminAlert {
    pub id: Uuid,
    pub trip_id: String,
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub message: String,
    /// False when the alert was raised while `escalation_enabled` was off.
    pub escalation_configured: bool,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl AdminAlert {
    pub fn is_open(&self) -> bool {
        !self.resolved
    }
}

/// Result of [`escalate`]: the open alert and whether this call created it.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub alert: AdminAlert,
    pub created: bool,
}

impl Escalation {
    /// Operator notice for a newly created alert, when policy allows one.
    pub fn operator_notice(&self, policy: &AutomationPolicy) -> Option<Notification> {
        if !self.created || !policy.escalation_enabled {
            return None;
        }
        Some(Notification::new(
            Recipient::Operators,
            TemplateId::OperatorAlert,
            serde_json::json!({
                "alert_id": self.alert.id,
                "trip_id": self.alert.trip_id,
                "alert_type": self.alert.alert_type,
                "priority": self.alert.priority,
                "message": self.alert.message,
            }),
        ))
    }
}

// ---------------------------------------------------------------------------
// Escalate / resolve
// ---------------------------------------------------------------------------

/// Open an alert for `trip`, or return the already-open one for the same cause.
pub fn escalate(
    txn: &WriteTxn,
    trip: &Trip,
    alert_type: AlertType,
    detail: &str,
    policy: &AutomationPolicy,
    now: DateTime<Utc>,
) -> Result<Escalation> {
    if let Some(existing) = txn
        .alerts_for_trip(&trip.id)?
        .into_iter()
        .find(|a| a.is_open() && a.alert_type == alert_type)
    {
        return Ok(Escalation {
            alert: existing,
            created: false,
        });
    }

    let mut message = format!("trip '{}': {detail}", trip.id);
    if !policy.escalation_enabled {
        message.push_str(" [no escalation configured]");
    }
    let alert = AdminAlert {
        id: Uuid::new_v4(),
        trip_id: trip.id.clone(),
        alert_type,
        priority: AlertPriority::for_start(trip.starts_at, now),
        message,
        escalation_configured: policy.escalation_enabled,
        resolved: false,
        created_at: now,
        resolved_at: None,
        resolution: None,
    };
    txn.put_alert(&alert)?;
    tracing::warn!(
        trip = %trip.id,
        alert = %alert.id,
        alert_type = %alert_type,
        priority = %alert.priority,
        "escalated to operators"
    );
    Ok(Escalation {
        alert,
        created: true,
    })
}

/// Resolve one alert. Resolving an already-resolved alert returns it unchanged.
pub fn resolve(
    store: &Store,
    id: Uuid,
    resolution: impl Into<String>,
    now: DateTime<Utc>,
) -> Result<AdminAlert> {
    let txn = store.write()?;
    let mut alert = txn
        .alert(id)?
        .ok_or_else(|| EngineError::AlertNotFound(id.to_string()))?;
    if alert.resolved {
        return Ok(alert);
    }
    mark_resolved(&mut alert, resolution.into(), now);
    txn.put_alert(&alert)?;
    txn.commit()?;
    tracing::info!(alert = %alert.id, trip = %alert.trip_id, "alert resolved");
    Ok(alert)
}

/// Resolve every open alert of a trip inside an existing transaction.
pub fn resolve_open_for_trip(
    txn: &WriteTxn,
    trip_id: &str,
    resolution: &str,
    now: DateTime<Utc>,
) -> Result<Vec<AdminAlert>> {
    resolve_open_where(txn, trip_id, resolution, now, |_| true)
}

/// Like [`resolve_open_for_trip`], limited to alert types `clears` accepts.
pub fn resolve_open_where(
    txn: &WriteTxn,
    trip_id: &str,
    resolution: &str,
    now: DateTime<Utc>,
    clears: impl Fn(AlertType) -> bool,
) -> Result<Vec<AdminAlert>> {
    let mut resolved = Vec::new();
    for mut alert in txn.alerts_for_trip(trip_id)? {
        if !alert.is_open() || !clears(alert.alert_type) {
            continue;
        }
        mark_resolved(&mut alert, resolution.to_string(), now);
        txn.put_alert(&alert)?;
        resolved.push(alert);
    }
    Ok(resolved)
}

fn mark_resolved(alert: &mut AdminAlert, resolution: String, now: DateTime<Utc>) {
    alert.resolved = true;
    alert.resolved_at = Some(now);
    alert.resolution = Some(resolution);
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// List alerts, newest first. Pass `None` for open alerts only,
/// `Some("resolved")` for resolved ones and `Some("all")` for everything.
pub fn list(store: &Store, status_filter: Option<&str>) -> Result<Vec<AdminAlert>> {
    let alerts = store.read()?.alerts()?;
    let filtered = match status_filter {
        Some("all") => alerts,
        Some("resolved") => alerts.into_iter().filter(|a| a.resolved).collect(),
        None | Some("open") => alerts.into_iter().filter(|a| a.is_open()).collect(),
        Some(other) => {
            return Err(EngineError::InvalidValue(format!(
                "unknown alert status '{other}': must be open, resolved, or all"
            )))
        }
    };
    Ok(filtered)
}

pub fn get(store: &Store, id: Uuid) -> Result<AdminAlert> {
    store
        .read()?
        .alert(id)?
        .ok_or_else(|| EngineError::AlertNotFound(id.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
