//! Automation policy: the single versioned record that bounds the
//! orchestrator: how many offers per trip, how long each waits, how often a
//! stalled trip is retried, and which automation toggles are on.
//!
//! The current policy is stored in the engine database (`policy` table,
//! key `current`), and every accepted update is appended to `policy_history`
//! under its version. Orchestrator decisions read the policy inside their own
//! write transaction, so a concurrent update can never be half-observed.

use crate::error::{EngineError, Result};
use crate::store::{Store, StoreView};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

const MIN_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 3600);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(30 * 24 * 3600);
const MAX_REQUESTS_CEILING: u32 = 100;

// ---------------------------------------------------------------------------
// AutomationPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationPolicy {
    pub version: u64,
    /// Master switch. When off the sweep leaves trips alone and triggers escalate.
    pub enabled: bool,
    pub max_requests_per_trip: u32,
    #[serde(
        rename = "response_timeout_secs",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub response_timeout: Duration,
    #[serde(
        rename = "retry_interval_secs",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub retry_interval: Duration,
    pub escalation_enabled: bool,
    pub auto_assignment_enabled: bool,
    pub notification_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl Default for AutomationPolicy {
    fn default() -> Self {
        Self {
            version: 1,
            enabled: true,
            max_requests_per_trip: 3,
            response_timeout: Duration::from_secs(24 * 3600),
            retry_interval: Duration::from_secs(3600),
            escalation_enabled: true,
            auto_assignment_enabled: true,
            notification_enabled: true,
            updated_at: DateTime::<Utc>::default(),
        }
    }
}

impl AutomationPolicy {
    /// Whether the orchestrator may issue requests at all.
    pub fn automation_active(&self) -> bool {
        self.enabled && self.auto_assignment_enabled
    }

    pub fn response_timeout_delta(&self) -> chrono::Duration {
        secs_delta(self.response_timeout)
    }

    pub fn retry_interval_delta(&self) -> chrono::Duration {
        secs_delta(self.retry_interval)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_requests_per_trip < 1 {
            return Err(EngineError::PolicyValidation(
                "max_requests_per_trip must be at least 1".into(),
            ));
        }
        if self.max_requests_per_trip > MAX_REQUESTS_CEILING {
            return Err(EngineError::PolicyValidation(format!(
                "max_requests_per_trip must be at most {MAX_REQUESTS_CEILING}"
            )));
        }
        if self.response_timeout < MIN_RESPONSE_TIMEOUT
            || self.response_timeout > MAX_RESPONSE_TIMEOUT
        {
            return Err(EngineError::PolicyValidation(format!(
                "response_timeout must be between {}s and {}s",
                MIN_RESPONSE_TIMEOUT.as_secs(),
                MAX_RESPONSE_TIMEOUT.as_secs()
            )));
        }
        if self.retry_interval.is_zero() || self.retry_interval > MAX_RETRY_INTERVAL {
            return Err(EngineError::PolicyValidation(format!(
                "retry_interval must be between 1s and {}s",
                MAX_RETRY_INTERVAL.as_secs()
            )));
        }
        Ok(())
    }

    /// Produce the next version of this policy with `update` applied.
    /// Validation runs on the merged result, before anything is persisted.
    pub fn apply(&self, update: &PolicyUpdate, now: DateTime<Utc>) -> Result<Self> {
        let mut next = self.clone();
        if let Some(v) = update.enabled {
            next.enabled = v;
        }
        if let Some(v) = update.max_requests_per_trip {
            next.max_requests_per_trip = v;
        }
        if let Some(v) = update.response_timeout_secs {
            next.response_timeout = Duration::from_secs(v);
        }
        if let Some(v) = update.retry_interval_secs {
            next.retry_interval = Duration::from_secs(v);
        }
        if let Some(v) = update.escalation_enabled {
            next.escalation_enabled = v;
        }
        if let Some(v) = update.auto_assignment_enabled {
            next.auto_assignment_enabled = v;
        }
        if let Some(v) = update.notification_enabled {
            next.notification_enabled = v;
        }
        next.validate()?;
        next.version = self.version + 1;
        next.updated_at = now;
        Ok(next)
    }
}

fn secs_delta(d: Duration) -> chrono::Duration {
    // Validated durations are far below i64::MAX seconds.
    chrono::Duration::seconds(d.as_secs() as i64)
}

// ---------------------------------------------------------------------------
// PolicyUpdate
// ---------------------------------------------------------------------------

/// Partial policy change submitted by an operator. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub max_requests_per_trip: Option<u32>,
    #[serde(default)]
    pub response_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_interval_secs: Option<u64>,
    #[serde(default)]
    pub escalation_enabled: Option<bool>,
    #[serde(default)]
    pub auto_assignment_enabled: Option<bool>,
    #[serde(default)]
    pub notification_enabled: Option<bool>,
}

impl PolicyUpdate {
    pub fn is_empty(&self) -> bool {
        *self == PolicyUpdate::default()
    }
}

// ---------------------------------------------------------------------------
// Store operations
// ---------------------------------------------------------------------------

/// Read the current policy (defaults if none was ever written).
pub fn current(store: &Store) -> Result<AutomationPolicy> {
    store.read()?.policy()
}

/// Validate and persist a policy update, returning the new version.
pub fn update(store: &Store, update: &PolicyUpdate, now: DateTime<Utc>) -> Result<AutomationPolicy> {
    let txn = store.write()?;
    let current = txn.policy()?;
    let next = current.apply(update, now)?;
    txn.put_policy(&next)?;
    txn.commit()?;
    tracing::info!(
        version = next.version,
        max_requests = next.max_requests_per_trip,
        response_timeout_secs = next.response_timeout.as_secs(),
        "automation policy updated"
    );
    Ok(next)
}

/// All persisted policy versions, oldest first.
pub fn history(store: &Store) -> Result<Vec<AutomationPolicy>> {
    store.read()?.policy_history()
}

// ---------------------------------------------------------------------------
// Serde helpers for Duration (serialized as seconds: u64)
// ---------------------------------------------------------------------------

fn serialize_secs<S>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_u64(d.as_secs())
}

fn deserialize_secs<'de, D>(d: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(d)?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn default_policy_is_valid() {
        AutomationPolicy::default().validate().unwrap();
    }

    #[test]
    fn zero_max_requests_rejected() {
        let update = PolicyUpdate {
            max_requests_per_trip: Some(0),
            ..Default::default()
        };
        let err = AutomationPolicy::default().apply(&update, now()).unwrap_err();
        assert!(matches!(err, EngineError::PolicyValidation(_)));
    }

    #[test]
    fn tiny_timeout_rejected() {
        let update = PolicyUpdate {
            response_timeout_secs: Some(5),
            ..Default::default()
        };
        assert!(AutomationPolicy::default().apply(&update, now()).is_err());
    }

    #[test]
    fn apply_bumps_version_and_keeps_unset_fields() {
        let base = AutomationPolicy::default();
        let update = PolicyUpdate {
            max_requests_per_trip: Some(5),
            ..Default::default()
        };
        let next = base.apply(&update, now()).unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.max_requests_per_trip, 5);
        assert_eq!(next.response_timeout, base.response_timeout);
        assert_eq!(next.updated_at, now());
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(AutomationPolicy::default()).unwrap();
        assert_eq!(json["response_timeout_secs"], 86_400);
        assert_eq!(json["retry_interval_secs"], 3_600);
        let back: AutomationPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back.response_timeout, Duration::from_secs(86_400));
    }

    #[test]
    fn store_returns_default_until_updated() {
        let (_dir, store) = open_tmp();
        assert_eq!(current(&store).unwrap(), AutomationPolicy::default());

        let update = PolicyUpdate {
            escalation_enabled: Some(false),
            ..Default::default()
        };
        let next = super::update(&store, &update, now()).unwrap();
        assert_eq!(current(&store).unwrap(), next);
        assert!(!next.escalation_enabled);
    }

    #[test]
    fn rejected_update_is_not_persisted() {
        let (_dir, store) = open_tmp();
        let bad = PolicyUpdate {
            max_requests_per_trip: Some(0),
            ..Default::default()
        };
        assert!(super::update(&store, &bad, now()).is_err());
        assert_eq!(current(&store).unwrap().version, 1);
        assert!(history(&store).unwrap().is_empty());
    }

    #[test]
    fn history_keeps_every_version() {
        let (_dir, store) = open_tmp();
        for n in 2..=4 {
            let update = PolicyUpdate {
                max_requests_per_trip: Some(n),
                ..Default::default()
            };
            super::update(&store, &update, now()).unwrap();
        }
        let versions: Vec<u64> = history(&store).unwrap().iter().map(|p| p.version).collect();
        assert_eq!(versions, vec![2, 3, 4]);
    }
}
