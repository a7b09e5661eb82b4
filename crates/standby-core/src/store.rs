//! Persistent storage for the assignment engine using redb.
//!
//! # Table design
//!
//! Every table maps a `&str` key to a JSON-encoded record. Records that
//! belong to a trip use a composite key so one range scan returns a trip's
//! rows without post-filtering:
//! ```text
//! applications   {trip_id}/{guide_id}
//! requests       {trip_id}/{request_uuid}    (+ request_index: uuid -> trip_id)
//! alerts         {trip_id}/{alert_uuid}      (+ alert_index:   uuid -> trip_id)
//! ```
//! Ids are validated to never contain `/`, and `0` sorts right after `/`,
//! so the range `"{trip}/".."{trip}0"` covers exactly one trip.
//!
//! redb allows a single write transaction at a time. The orchestrator runs
//! each transition inside one [`WriteTxn`], which is what makes the
//! "assign only if still unassigned" check-and-set atomic.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{store_err, Result};
use crate::escalation::AdminAlert;
use crate::notify::OutboxEntry;
use crate::paths::validate_id;
use crate::policy::AutomationPolicy;
use crate::types::{BackupApplication, BackupRequest, Guide, Trip, TripWorkflow};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

const TRIPS: JsonTable = TableDefinition::new("trips");
const GUIDES: JsonTable = TableDefinition::new("guides");
const APPLICATIONS: JsonTable = TableDefinition::new("applications");
const REQUESTS: JsonTable = TableDefinition::new("requests");
const REQUEST_INDEX: JsonTable = TableDefinition::new("request_index");
const WORKFLOWS: JsonTable = TableDefinition::new("workflows");
const ALERTS: JsonTable = TableDefinition::new("alerts");
const ALERT_INDEX: JsonTable = TableDefinition::new("alert_index");
const POLICY: JsonTable = TableDefinition::new("policy");
const POLICY_HISTORY: JsonTable = TableDefinition::new("policy_history");
const OUTBOX: JsonTable = TableDefinition::new("outbox");

const ALL_TABLES: [JsonTable; 11] = [
    TRIPS,
    GUIDES,
    APPLICATIONS,
    REQUESTS,
    REQUEST_INDEX,
    WORKFLOWS,
    ALERTS,
    ALERT_INDEX,
    POLICY,
    POLICY_HISTORY,
    OUTBOX,
];

const CURRENT_POLICY_KEY: &str = "current";

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn child_key(trip_id: &str, child: &str) -> String {
    format!("{trip_id}/{child}")
}

fn history_key(version: u64) -> String {
    format!("{version:020}")
}

// ---------------------------------------------------------------------------
// Generic JSON table access
// ---------------------------------------------------------------------------

fn get_json<T, R>(table: &R, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let entry = table.get(key).map_err(store_err)?;
    let value = match entry {
        Some(guard) => Some(serde_json::from_slice(guard.value())?),
        None => None,
    };
    Ok(value)
}

fn scan_json<T, R>(table: &R, prefix: Option<&str>) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut result = Vec::new();
    match prefix {
        Some(p) => {
            let lower = format!("{p}/");
            let upper = format!("{p}0");
            for entry in table
                .range(lower.as_str()..upper.as_str())
                .map_err(store_err)?
            {
                let (_, v) = entry.map_err(store_err)?;
                result.push(serde_json::from_slice(v.value())?);
            }
        }
        None => {
            for entry in table.iter().map_err(store_err)? {
                let (_, v) = entry.map_err(store_err)?;
                result.push(serde_json::from_slice(v.value())?);
            }
        }
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The engine database.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open or create the redb database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        for table in ALL_TABLES {
            wt.open_table(table).map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    pub fn read(&self) -> Result<ReadTxn> {
        let rt = self.db.begin_read().map_err(store_err)?;
        Ok(ReadTxn { rt })
    }

    /// Begin a write transaction. Blocks while another writer is active.
    pub fn write(&self) -> Result<WriteTxn> {
        let wt = self.db.begin_write().map_err(store_err)?;
        Ok(WriteTxn { wt })
    }
}

// ---------------------------------------------------------------------------
// StoreView: typed reads shared by read and write transactions
// ---------------------------------------------------------------------------

pub trait StoreView {
    fn load<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> Result<Option<T>>;

    fn load_all<T: DeserializeOwned>(&self, table: JsonTable, prefix: Option<&str>)
        -> Result<Vec<T>>;

    fn trip(&self, id: &str) -> Result<Option<Trip>> {
        self.load(TRIPS, id)
    }

    fn trips(&self) -> Result<Vec<Trip>> {
        self.load_all(TRIPS, None)
    }

    fn guide(&self, id: &str) -> Result<Option<Guide>> {
        self.load(GUIDES, id)
    }

    fn guides(&self) -> Result<Vec<Guide>> {
        self.load_all(GUIDES, None)
    }

    fn application(&self, trip_id: &str, guide_id: &str) -> Result<Option<BackupApplication>> {
        self.load(APPLICATIONS, &child_key(trip_id, guide_id))
    }

    fn applications_for_trip(&self, trip_id: &str) -> Result<Vec<BackupApplication>> {
        self.load_all(APPLICATIONS, Some(trip_id))
    }

    fn request(&self, id: Uuid) -> Result<Option<BackupRequest>> {
        let key = id.to_string();
        let Some(trip_id) = self.load::<String>(REQUEST_INDEX, &key)? else {
            return Ok(None);
        };
        self.load(REQUESTS, &child_key(&trip_id, &key))
    }

    /// Requests for one trip, oldest first.
    fn requests_for_trip(&self, trip_id: &str) -> Result<Vec<BackupRequest>> {
        let mut requests: Vec<BackupRequest> = self.load_all(REQUESTS, Some(trip_id))?;
        requests.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(requests)
    }

    fn workflow(&self, trip_id: &str) -> Result<Option<TripWorkflow>> {
        self.load(WORKFLOWS, trip_id)
    }

    fn alert(&self, id: Uuid) -> Result<Option<AdminAlert>> {
        let key = id.to_string();
        let Some(trip_id) = self.load::<String>(ALERT_INDEX, &key)? else {
            return Ok(None);
        };
        self.load(ALERTS, &child_key(&trip_id, &key))
    }

    fn alerts_for_trip(&self, trip_id: &str) -> Result<Vec<AdminAlert>> {
        self.load_all(ALERTS, Some(trip_id))
    }

    /// All alerts, newest first.
    fn alerts(&self) -> Result<Vec<AdminAlert>> {
        let mut alerts: Vec<AdminAlert> = self.load_all(ALERTS, None)?;
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    /// The current policy, or the defaults when none was ever stored.
    fn policy(&self) -> Result<AutomationPolicy> {
        Ok(self
            .load(POLICY, CURRENT_POLICY_KEY)?
            .unwrap_or_default())
    }

    fn policy_history(&self) -> Result<Vec<AutomationPolicy>> {
        self.load_all(POLICY_HISTORY, None)
    }

    fn outbox(&self) -> Result<Vec<OutboxEntry>> {
        self.load_all(OUTBOX, None)
    }
}

// ---------------------------------------------------------------------------
// ReadTxn
// ---------------------------------------------------------------------------

pub struct ReadTxn {
    rt: redb::ReadTransaction,
}

impl StoreView for ReadTxn {
    fn load<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> Result<Option<T>> {
        let table = self.rt.open_table(table).map_err(store_err)?;
        get_json(&table, key)
    }

    fn load_all<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        prefix: Option<&str>,
    ) -> Result<Vec<T>> {
        let table = self.rt.open_table(table).map_err(store_err)?;
        scan_json(&table, prefix)
    }
}

// ---------------------------------------------------------------------------
// WriteTxn
// ---------------------------------------------------------------------------

/// A write transaction. Dropping it without [`WriteTxn::commit`] aborts.
pub struct WriteTxn {
    wt: redb::WriteTransaction,
}

impl StoreView for WriteTxn {
    fn load<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> Result<Option<T>> {
        let table = self.wt.open_table(table).map_err(store_err)?;
        get_json(&table, key)
    }

    fn load_all<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        prefix: Option<&str>,
    ) -> Result<Vec<T>> {
        let table = self.wt.open_table(table).map_err(store_err)?;
        scan_json(&table, prefix)
    }
}

impl WriteTxn {
    fn save<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let mut table = self.wt.open_table(table).map_err(store_err)?;
        table.insert(key, bytes.as_slice()).map_err(store_err)?;
        Ok(())
    }

    fn delete(&self, table: JsonTable, key: &str) -> Result<()> {
        let mut table = self.wt.open_table(table).map_err(store_err)?;
        table.remove(key).map_err(store_err)?;
        Ok(())
    }

    pub fn put_trip(&self, trip: &Trip) -> Result<()> {
        validate_id(&trip.id)?;
        self.save(TRIPS, &trip.id, trip)
    }

    pub fn put_guide(&self, guide: &Guide) -> Result<()> {
        validate_id(&guide.id)?;
        self.save(GUIDES, &guide.id, guide)
    }

    pub fn put_application(&self, app: &BackupApplication) -> Result<()> {
        validate_id(&app.trip_id)?;
        validate_id(&app.guide_id)?;
        self.save(APPLICATIONS, &child_key(&app.trip_id, &app.guide_id), app)
    }

    pub fn put_request(&self, request: &BackupRequest) -> Result<()> {
        let id = request.id.to_string();
        self.save(REQUESTS, &child_key(&request.trip_id, &id), request)?;
        self.save(REQUEST_INDEX, &id, &request.trip_id)
    }

    pub fn put_workflow(&self, workflow: &TripWorkflow) -> Result<()> {
        self.save(WORKFLOWS, &workflow.trip_id, workflow)
    }

    pub fn put_alert(&self, alert: &AdminAlert) -> Result<()> {
        let id = alert.id.to_string();
        self.save(ALERTS, &child_key(&alert.trip_id, &id), alert)?;
        self.save(ALERT_INDEX, &id, &alert.trip_id)
    }

    /// Store `policy` as current and append it to the history.
    pub fn put_policy(&self, policy: &AutomationPolicy) -> Result<()> {
        self.save(POLICY, CURRENT_POLICY_KEY, policy)?;
        self.save(POLICY_HISTORY, &history_key(policy.version), policy)
    }

    pub fn put_outbox(&self, entry: &OutboxEntry) -> Result<()> {
        self.save(OUTBOX, &entry.id.to_string(), entry)
    }

    pub fn remove_outbox(&self, id: Uuid) -> Result<()> {
        self.delete(OUTBOX, &id.to_string())
    }

    pub fn commit(self) -> Result<()> {
        self.wt.commit().map_err(store_err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RequestStatus, TripStatus};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn trip(id: &str) -> Trip {
        Trip {
            id: id.to_string(),
            title: String::new(),
            starts_at: t0() + Duration::days(3),
            ends_at: t0() + Duration::days(4),
            requires_backup: true,
            primary_guide_id: None,
            backup_guide_id: None,
            status: TripStatus::Active,
        }
    }

    #[test]
    fn trip_roundtrip() {
        let (_dir, store) = open_tmp();
        let txn = store.write().unwrap();
        txn.put_trip(&trip("trip-1")).unwrap();
        txn.commit().unwrap();

        let loaded = store.read().unwrap().trip("trip-1").unwrap().unwrap();
        assert_eq!(loaded, trip("trip-1"));
        assert!(store.read().unwrap().trip("trip-2").unwrap().is_none());
    }

    #[test]
    fn uncommitted_write_is_discarded() {
        let (_dir, store) = open_tmp();
        {
            let txn = store.write().unwrap();
            txn.put_trip(&trip("trip-1")).unwrap();
        }
        assert!(store.read().unwrap().trips().unwrap().is_empty());
    }

    #[test]
    fn requests_are_scoped_by_trip_prefix() {
        let (_dir, store) = open_tmp();
        let txn = store.write().unwrap();
        // "trip-1" must not pick up rows of "trip-10".
        for (trip_id, offset) in [("trip-1", 0), ("trip-10", 1), ("trip-1", 2)] {
            let req = BackupRequest::issue(
                trip_id,
                "g1",
                50.0,
                t0() + Duration::minutes(offset),
                Duration::hours(1),
                1,
            );
            txn.put_request(&req).unwrap();
        }
        txn.commit().unwrap();

        let view = store.read().unwrap();
        let reqs = view.requests_for_trip("trip-1").unwrap();
        assert_eq!(reqs.len(), 2);
        assert!(reqs[0].requested_at < reqs[1].requested_at);
        assert_eq!(view.requests_for_trip("trip-10").unwrap().len(), 1);
    }

    #[test]
    fn request_lookup_by_id_uses_index() {
        let (_dir, store) = open_tmp();
        let mut req = BackupRequest::issue("trip-1", "g1", 50.0, t0(), Duration::hours(1), 1);
        let txn = store.write().unwrap();
        txn.put_request(&req).unwrap();
        txn.commit().unwrap();

        req.close(RequestStatus::Declined, t0());
        let txn = store.write().unwrap();
        txn.put_request(&req).unwrap();
        txn.commit().unwrap();

        let loaded = store.read().unwrap().request(req.id).unwrap().unwrap();
        assert_eq!(loaded.status, RequestStatus::Declined);
        assert!(store.read().unwrap().request(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn ids_with_separator_are_rejected() {
        let (_dir, store) = open_tmp();
        let txn = store.write().unwrap();
        assert!(txn.put_trip(&trip("bad/id")).is_err());
    }

    #[test]
    fn reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        {
            let store = Store::open(&path).unwrap();
            let txn = store.write().unwrap();
            txn.put_trip(&trip("trip-1")).unwrap();
            txn.commit().unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.read().unwrap().trips().unwrap().len(), 1);
    }
}
