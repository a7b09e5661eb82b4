use crate::error::EngineError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Trip
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Active,
    Cancelled,
    Completed,
}

impl TripStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TripStatus::Active => "active",
            TripStatus::Cancelled => "cancelled",
            TripStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TripStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TripStatus::Active),
            "cancelled" => Ok(TripStatus::Cancelled),
            "completed" => Ok(TripStatus::Completed),
            _ => Err(EngineError::InvalidValue(format!(
                "unknown trip status '{s}': must be active, cancelled, or completed"
            ))),
        }
    }
}

/// A scheduled trip. Owned upstream; the engine only writes `backup_guide_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub requires_backup: bool,
    #[serde(default)]
    pub primary_guide_id: Option<String>,
    #[serde(default)]
    pub backup_guide_id: Option<String>,
    pub status: TripStatus,
}

impl Trip {
    pub fn is_active(&self) -> bool {
        self.status == TripStatus::Active
    }
}

// ---------------------------------------------------------------------------
// Guide
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guide {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub unavailable: bool,
    /// Opaque delivery address handed to the notifier (email, phone, push token).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

impl Guide {
    pub fn is_eligible(&self) -> bool {
        self.active && !self.unavailable
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// BackupApplication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A guide's pre-approved eligibility to back up one trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupApplication {
    pub trip_id: String,
    pub guide_id: String,
    pub status: ApplicationStatus,
    /// Precomputed fitness; higher is better.
    #[serde(default)]
    pub match_score: f64,
    pub applied_at: DateTime<Utc>,
    /// Set once a request issued from this application was accepted.
    #[serde(default)]
    pub assigned: bool,
}

// ---------------------------------------------------------------------------
// BackupRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Superseded,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Declined => "declined",
            RequestStatus::Expired => "expired",
            RequestStatus::Superseded => "superseded",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != RequestStatus::Pending
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    /// Issued by the orchestrator from the ranked candidate list.
    Automatic,
    /// Recorded for an operator override; never counts against the request budget.
    Manual,
}

/// One time-boxed offer of the backup role to one guide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRequest {
    pub id: Uuid,
    pub trip_id: String,
    pub guide_id: String,
    pub match_score: f64,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub response_deadline: DateTime<Utc>,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
    pub policy_version: u64,
    pub origin: RequestOrigin,
}

impl BackupRequest {
    /// Create a pending request whose deadline is `requested_at + response_timeout`.
    pub fn issue(
        trip_id: impl Into<String>,
        guide_id: impl Into<String>,
        match_score: f64,
        requested_at: DateTime<Utc>,
        response_timeout: Duration,
        policy_version: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trip_id: trip_id.into(),
            guide_id: guide_id.into(),
            match_score,
            status: RequestStatus::Pending,
            requested_at,
            response_deadline: requested_at + response_timeout,
            responded_at: None,
            policy_version,
            origin: RequestOrigin::Automatic,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now > self.response_deadline
    }

    /// Move to a terminal status. Terminal requests never change again;
    /// returns false when the request was already terminal.
    pub fn close(&mut self, status: RequestStatus, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.responded_at = Some(at);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Decline,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Accept => f.write_str("accept"),
            Decision::Decline => f.write_str("decline"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Decision::Accept),
            "decline" => Ok(Decision::Decline),
            _ => Err(EngineError::InvalidValue(format!(
                "unknown decision '{s}': must be accept or decline"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TripWorkflow
// ---------------------------------------------------------------------------

/// Per-trip assignment state.
///
/// Transitions: `Idle → NeedsBackup → Requesting → Assigned | Escalated`.
/// `Escalated` is left only by a later trigger (sweep retry or operator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    Idle,
    NeedsBackup,
    Requesting,
    Assigned,
    Escalated,
}

impl AssignmentState {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentState::Idle => "idle",
            AssignmentState::NeedsBackup => "needs_backup",
            AssignmentState::Requesting => "requesting",
            AssignmentState::Assigned => "assigned",
            AssignmentState::Escalated => "escalated",
        }
    }
}

impl fmt::Display for AssignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// The primary guide withdrew.
    GuideCancelled,
    /// The trip was flagged as requiring a standby.
    BackupRequired,
    /// Re-entered by the sweep monitor.
    Sweep,
    /// Re-entered by an operator.
    Manual,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::GuideCancelled => "guide_cancelled",
            TriggerReason::BackupRequired => "backup_required",
            TriggerReason::Sweep => "sweep",
            TriggerReason::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerReason {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guide_cancelled" => Ok(TriggerReason::GuideCancelled),
            "backup_required" => Ok(TriggerReason::BackupRequired),
            "sweep" => Ok(TriggerReason::Sweep),
            "manual" => Ok(TriggerReason::Manual),
            _ => Err(EngineError::InvalidValue(format!(
                "unknown trigger reason '{s}': must be guide_cancelled, backup_required, sweep, or manual"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripWorkflow {
    pub trip_id: String,
    pub state: AssignmentState,
    #[serde(default)]
    pub reason: Option<TriggerReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_guide_name: Option<String>,
    /// Last time the orchestrator tried to advance this trip.
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TripWorkflow {
    pub fn idle(trip_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            trip_id: trip_id.into(),
            state: AssignmentState::Idle,
            reason: None,
            prior_guide_name: None,
            last_attempt_at: None,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, state: AssignmentState, now: DateTime<Utc>) {
        self.state = state;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn deadline_is_requested_at_plus_timeout() {
        for secs in [1, 59, 3_600, 86_400, 7 * 86_400 + 13] {
            let timeout = Duration::seconds(secs);
            let req = BackupRequest::issue("trip-1", "g1", 90.0, t0(), timeout, 1);
            assert_eq!(req.response_deadline, req.requested_at + timeout);
            assert_eq!(req.response_deadline - req.requested_at, timeout);
        }
    }

    #[test]
    fn terminal_status_is_final() {
        let mut req = BackupRequest::issue("trip-1", "g1", 90.0, t0(), Duration::hours(1), 1);
        assert!(req.close(RequestStatus::Declined, t0()));
        assert!(!req.close(RequestStatus::Accepted, t0()));
        assert!(!req.close(RequestStatus::Superseded, t0()));
        assert_eq!(req.status, RequestStatus::Declined);
    }

    #[test]
    fn close_rejects_pending_target() {
        let mut req = BackupRequest::issue("trip-1", "g1", 90.0, t0(), Duration::hours(1), 1);
        assert!(!req.close(RequestStatus::Pending, t0()));
        assert!(req.responded_at.is_none());
    }

    #[test]
    fn overdue_only_after_deadline() {
        let req = BackupRequest::issue("trip-1", "g1", 90.0, t0(), Duration::hours(1), 1);
        assert!(!req.is_overdue(t0() + Duration::hours(1)));
        assert!(req.is_overdue(t0() + Duration::hours(1) + Duration::seconds(1)));
    }

    #[test]
    fn decision_and_reason_parse() {
        assert_eq!("accept".parse::<Decision>().unwrap(), Decision::Accept);
        assert!("maybe".parse::<Decision>().is_err());
        assert_eq!(
            "guide_cancelled".parse::<TriggerReason>().unwrap(),
            TriggerReason::GuideCancelled
        );
        assert!("bored".parse::<TriggerReason>().is_err());
    }

    #[test]
    fn guide_defaults_to_active_when_omitted() {
        let guide: Guide = serde_yaml::from_str("id: g1\nname: Aiko\n").unwrap();
        assert!(guide.is_eligible());
    }
}
