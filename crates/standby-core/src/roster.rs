//! Roster intake: trips, guides and backup applications from upstream.
//!
//! These records are owned by the booking system. The engine only stores
//! them, except for the fields it owns itself (`Trip::backup_guide_id` and
//! `BackupApplication::assigned`), which an upsert never overwrites.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{Store, StoreView, WriteTxn};
use crate::types::{BackupApplication, Guide, Trip};

/// A batch of upstream records, as read from a YAML roster file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    #[serde(default)]
    pub guides: Vec<Guide>,
    #[serde(default)]
    pub trips: Vec<Trip>,
    #[serde(default)]
    pub applications: Vec<BackupApplication>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&data)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub trips_created: u32,
    pub trips_updated: u32,
    pub guides: u32,
    pub applications: u32,
}

/// Apply a roster in one transaction. Either every record lands or none do.
pub fn import(store: &Store, roster: &Roster) -> Result<ImportReport> {
    let txn = store.write()?;
    let mut report = ImportReport::default();
    for guide in &roster.guides {
        txn.put_guide(guide)?;
        report.guides += 1;
    }
    for trip in &roster.trips {
        if merge_trip(&txn, trip.clone())?.1 {
            report.trips_created += 1;
        } else {
            report.trips_updated += 1;
        }
    }
    for app in &roster.applications {
        merge_application(&txn, app.clone())?;
        report.applications += 1;
    }
    txn.commit()?;
    tracing::info!(
        guides = report.guides,
        trips_created = report.trips_created,
        trips_updated = report.trips_updated,
        applications = report.applications,
        "roster imported"
    );
    Ok(report)
}

pub fn upsert_trip(store: &Store, trip: Trip) -> Result<Trip> {
    let txn = store.write()?;
    let (trip, _) = merge_trip(&txn, trip)?;
    txn.commit()?;
    Ok(trip)
}

pub fn upsert_guide(store: &Store, guide: Guide) -> Result<Guide> {
    let txn = store.write()?;
    txn.put_guide(&guide)?;
    txn.commit()?;
    Ok(guide)
}

pub fn upsert_application(store: &Store, app: BackupApplication) -> Result<BackupApplication> {
    let txn = store.write()?;
    let app = merge_application(&txn, app)?;
    txn.commit()?;
    Ok(app)
}

/// Returns the stored trip and whether it was new.
fn merge_trip(txn: &WriteTxn, mut trip: Trip) -> Result<(Trip, bool)> {
    let existing = txn.trip(&trip.id)?;
    let created = existing.is_none();
    trip.backup_guide_id = existing.and_then(|t| t.backup_guide_id);
    txn.put_trip(&trip)?;
    Ok((trip, created))
}

fn merge_application(txn: &WriteTxn, mut app: BackupApplication) -> Result<BackupApplication> {
    app.assigned = txn
        .application(&app.trip_id, &app.guide_id)?
        .is_some_and(|a| a.assigned);
    txn.put_application(&app)?;
    Ok(app)
}
