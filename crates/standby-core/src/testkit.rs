//! Shared fixtures for engine unit tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use crate::escalation::AdminAlert;
use crate::notify::{Dispatcher, MemoryNotifier, RetrySchedule};
use crate::orchestrator::Orchestrator;
use crate::policy::AutomationPolicy;
use crate::store::{Store, StoreView};
use crate::types::{
    ApplicationStatus, BackupApplication, BackupRequest, Guide, Trip, TripStatus, TripWorkflow,
};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub(crate) struct Fixture {
    _dir: TempDir,
    pub store: Arc<Store>,
    pub notifier: Arc<MemoryNotifier>,
    pub orch: Orchestrator,
}

pub(crate) fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("standby.db")).unwrap());
    let notifier = MemoryNotifier::new();
    let dispatcher = Dispatcher::new(notifier.clone(), RetrySchedule::default());
    let orch = Orchestrator::new(store.clone(), dispatcher);
    Fixture {
        _dir: dir,
        store,
        notifier,
        orch,
    }
}

impl Fixture {
    /// Active trip starting `days_out` days after [`t0`], primary guide "lead".
    pub fn trip(&self, id: &str, days_out: i64) -> Trip {
        let trip = Trip {
            id: id.into(),
            title: format!("Trip {id}"),
            starts_at: t0() + Duration::days(days_out),
            ends_at: t0() + Duration::days(days_out + 2),
            requires_backup: false,
            primary_guide_id: Some("lead".into()),
            backup_guide_id: None,
            status: TripStatus::Active,
        };
        self.put_trip(&trip);
        trip
    }

    pub fn put_trip(&self, trip: &Trip) {
        let txn = self.store.write().unwrap();
        txn.put_trip(trip).unwrap();
        txn.commit().unwrap();
    }

    /// Register `guide_id` and approve their application for `trip_id`.
    pub fn approve(&self, trip_id: &str, guide_id: &str, score: f64) {
        let txn = self.store.write().unwrap();
        txn.put_guide(&Guide {
            id: guide_id.into(),
            name: guide_id.to_uppercase(),
            active: true,
            unavailable: false,
            contact: None,
        })
        .unwrap();
        txn.put_application(&BackupApplication {
            trip_id: trip_id.into(),
            guide_id: guide_id.into(),
            status: ApplicationStatus::Approved,
            match_score: score,
            applied_at: t0(),
            assigned: false,
        })
        .unwrap();
        txn.commit().unwrap();
    }

    pub fn set_policy(&self, edit: impl FnOnce(&mut AutomationPolicy)) {
        let txn = self.store.write().unwrap();
        let mut policy = txn.policy().unwrap();
        edit(&mut policy);
        policy.version += 1;
        txn.put_policy(&policy).unwrap();
        txn.commit().unwrap();
    }

    pub fn trip_row(&self, id: &str) -> Trip {
        self.store.read().unwrap().trip(id).unwrap().unwrap()
    }

    pub fn requests(&self, trip_id: &str) -> Vec<BackupRequest> {
        self.store.read().unwrap().requests_for_trip(trip_id).unwrap()
    }

    pub fn workflow(&self, trip_id: &str) -> TripWorkflow {
        self.store.read().unwrap().workflow(trip_id).unwrap().unwrap()
    }

    pub fn open_alerts(&self, trip_id: &str) -> Vec<AdminAlert> {
        self.store
            .read()
            .unwrap()
            .alerts_for_trip(trip_id)
            .unwrap()
            .into_iter()
            .filter(|a| a.is_open())
            .collect()
    }
}
