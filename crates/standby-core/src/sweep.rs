//! Sweep monitor: the periodic pass that keeps the engine honest without
//! relying on inbound events.
//!
//! Each pass, per trip:
//! - cancelled/completed trips have their pending offers withdrawn and open
//!   alerts closed;
//! - covered trips have open alerts closed, and are flagged when the stored
//!   requests disagree with the assignment;
//! - uncovered trips that need a backup get overdue offers expired, and are
//!   (re)triggered when nothing is in flight.
//!
//! A pass is idempotent: running it twice at the same instant changes nothing
//! the second time.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::escalation::{self, AlertType};
use crate::notify::DeliveryReport;
use crate::orchestrator::{withdrawn_notice, Effect, Orchestrator};
use crate::store::StoreView;
use crate::types::{AssignmentState, RequestStatus, Trip, TriggerReason};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub trips_scanned: u32,
    pub expired: u32,
    pub triggered: u32,
    pub resumed: u32,
    pub escalated: u32,
    pub withdrawn: u32,
    pub alerts_resolved: u32,
    pub inconsistencies: u32,
    /// Trips whose processing failed this pass; retried next pass.
    pub failed: u32,
    pub notifications: DeliveryReport,
}

impl SweepReport {
    /// True when the pass changed nothing and delivered nothing.
    pub fn is_noop(&self) -> bool {
        let scanned_only = SweepReport {
            trips_scanned: 0,
            ..*self
        };
        scanned_only == SweepReport::default()
    }
}

/// Run one sweep pass.
pub fn run_once(orch: &Orchestrator, now: DateTime<Utc>) -> Result<SweepReport> {
    let (trips, policy) = {
        let view = orch.store().read()?;
        (view.trips()?, view.policy()?)
    };

    let mut report = SweepReport::default();
    for trip in trips {
        report.trips_scanned += 1;
        let outcome = if !trip.is_active() {
            settle_inactive(orch, &trip.id, now, &mut report)
        } else if trip.backup_guide_id.is_some() {
            settle_assigned(orch, &trip.id, now, &mut report)
        } else if policy.enabled {
            advance_uncovered(orch, &trip, now, &mut report)
        } else {
            Ok(())
        };
        if let Err(e) = outcome {
            tracing::error!(trip = %trip.id, error = %e, "sweep failed for trip");
            report.failed += 1;
        }
    }

    report.notifications = orch.dispatcher().retry_due(orch.store(), now)?;

    if !report.is_noop() {
        tracing::info!(
            trips = report.trips_scanned,
            expired = report.expired,
            triggered = report.triggered,
            resumed = report.resumed,
            escalated = report.escalated,
            withdrawn = report.withdrawn,
            alerts_resolved = report.alerts_resolved,
            inconsistencies = report.inconsistencies,
            failed = report.failed,
            "sweep complete"
        );
    }
    Ok(report)
}

fn advance_uncovered(
    orch: &Orchestrator,
    trip: &Trip,
    now: DateTime<Utc>,
    report: &mut SweepReport,
) -> Result<()> {
    let (workflow, requests, policy) = {
        let view = orch.store().read()?;
        (
            view.workflow(&trip.id)?,
            view.requests_for_trip(&trip.id)?,
            view.policy()?,
        )
    };

    if requests.iter().any(|r| r.status == RequestStatus::Accepted) {
        return flag_inconsistent(
            orch,
            &trip.id,
            "an accepted backup request exists but no backup guide is set",
            now,
            report,
        );
    }

    let needs_backup =
        trip.requires_backup || workflow.as_ref().is_some_and(|w| w.state != AssignmentState::Idle);
    if !needs_backup {
        return Ok(());
    }

    for request in requests.iter().filter(|r| r.is_overdue(now)) {
        if let Some(effect) = orch.expire(request.id, now)? {
            report.expired += 1;
            if matches!(effect, Effect::Escalated { alert_created: true, .. }) {
                report.escalated += 1;
            }
        }
    }

    let (workflow, requests) = {
        let view = orch.store().read()?;
        (view.workflow(&trip.id)?, view.requests_for_trip(&trip.id)?)
    };
    if requests.iter().any(|r| r.is_pending()) {
        return Ok(());
    }

    let state = workflow.as_ref().map(|w| w.state);
    let due = workflow
        .as_ref()
        .and_then(|w| w.last_attempt_at)
        .map_or(true, |at| now - at >= policy.retry_interval_delta());

    if requests.is_empty() {
        // Never offered, or the pool was empty last time: retry on the interval.
        if !due {
            return Ok(());
        }
        let out = orch.trigger(&trip.id, TriggerReason::Sweep, None, now)?;
        report.triggered += 1;
        count_escalation(&out.effect, report);
    } else if !matches!(
        state,
        Some(AssignmentState::Escalated) | Some(AssignmentState::Assigned)
    ) {
        // Offers were made but the workflow stalled without a next step.
        let out = orch.trigger(&trip.id, TriggerReason::Sweep, None, now)?;
        report.resumed += 1;
        count_escalation(&out.effect, report);
    }
    Ok(())
}

fn count_escalation(effect: &Effect, report: &mut SweepReport) {
    if matches!(effect, Effect::Escalated { alert_created: true, .. }) {
        report.escalated += 1;
    }
}

/// Covered trip: close stale alerts, or flag a broken assignment record.
fn settle_assigned(
    orch: &Orchestrator,
    trip_id: &str,
    now: DateTime<Utc>,
    report: &mut SweepReport,
) -> Result<()> {
    let lock = orch.trip_lock(trip_id);
    let guard = lock.hold();

    let txn = orch.store().write()?;
    let trip = txn
        .trip(trip_id)?
        .ok_or_else(|| EngineError::TripNotFound(trip_id.to_string()))?;
    let Some(guide_id) = trip.backup_guide_id.clone() else {
        return Ok(());
    };
    let policy = txn.policy()?;
    let requests = txn.requests_for_trip(trip_id)?;
    let accepted: Vec<_> = requests
        .iter()
        .filter(|r| r.status == RequestStatus::Accepted)
        .collect();

    let mut notes = Vec::new();
    let mut changed = false;

    if accepted.len() != 1 || accepted[0].guide_id != guide_id {
        let detail = format!(
            "backup guide '{guide_id}' is set but {} accepted request(s) match",
            accepted.iter().filter(|r| r.guide_id == guide_id).count()
        );
        let esc = escalation::escalate(&txn, &trip, AlertType::InconsistentState, &detail, &policy, now)?;
        if esc.created {
            report.inconsistencies += 1;
            notes.extend(esc.operator_notice(&policy));
            changed = true;
        }
    } else {
        let resolved = escalation::resolve_open_for_trip(
            &txn,
            trip_id,
            &format!("covered by backup guide '{guide_id}'"),
            now,
        )?;
        report.alerts_resolved += resolved.len() as u32;
        changed |= !resolved.is_empty();
    }

    for mut request in requests.into_iter().filter(|r| r.is_pending()) {
        request.close(RequestStatus::Superseded, now);
        txn.put_request(&request)?;
        notes.push(withdrawn_notice(&request, &trip, "another guide took the slot"));
        report.withdrawn += 1;
        changed = true;
    }

    if let Some(mut workflow) = txn.workflow(trip_id)? {
        if workflow.state != AssignmentState::Assigned {
            workflow.transition(AssignmentState::Assigned, now);
            txn.put_workflow(&workflow)?;
            changed = true;
        }
    }

    if changed {
        txn.commit()?;
    }
    drop(guard);
    orch.deliver(notes, &policy, now);
    Ok(())
}

/// Cancelled or completed trip: withdraw outstanding offers and close alerts.
fn settle_inactive(
    orch: &Orchestrator,
    trip_id: &str,
    now: DateTime<Utc>,
    report: &mut SweepReport,
) -> Result<()> {
    let lock = orch.trip_lock(trip_id);
    let guard = lock.hold();

    let txn = orch.store().write()?;
    let trip = txn
        .trip(trip_id)?
        .ok_or_else(|| EngineError::TripNotFound(trip_id.to_string()))?;
    let policy = txn.policy()?;
    let mut notes = Vec::new();
    let mut changed = false;

    for mut request in txn.requests_for_trip(trip_id)? {
        if !request.is_pending() {
            continue;
        }
        request.close(RequestStatus::Superseded, now);
        txn.put_request(&request)?;
        notes.push(withdrawn_notice(&request, &trip, "trip is no longer running"));
        report.withdrawn += 1;
        changed = true;
    }

    let resolved =
        escalation::resolve_open_for_trip(&txn, trip_id, &format!("trip {}", trip.status), now)?;
    report.alerts_resolved += resolved.len() as u32;
    changed |= !resolved.is_empty();

    if let Some(mut workflow) = txn.workflow(trip_id)? {
        if !matches!(
            workflow.state,
            AssignmentState::Idle | AssignmentState::Assigned
        ) {
            workflow.transition(AssignmentState::Idle, now);
            txn.put_workflow(&workflow)?;
            changed = true;
        }
    }

    if changed {
        txn.commit()?;
        tracing::info!(trip = %trip_id, status = %trip.status, "wound down inactive trip");
    }
    drop(guard);
    orch.deliver(notes, &policy, now);
    Ok(())
}

fn flag_inconsistent(
    orch: &Orchestrator,
    trip_id: &str,
    detail: &str,
    now: DateTime<Utc>,
    report: &mut SweepReport,
) -> Result<()> {
    let lock = orch.trip_lock(trip_id);
    let guard = lock.hold();

    let txn = orch.store().write()?;
    let trip = txn
        .trip(trip_id)?
        .ok_or_else(|| EngineError::TripNotFound(trip_id.to_string()))?;
    let policy = txn.policy()?;
    let esc = escalation::escalate(&txn, &trip, AlertType::InconsistentState, detail, &policy, now)?;
    if !esc.created {
        return Ok(());
    }
    txn.commit()?;
    drop(guard);
    report.inconsistencies += 1;
    orch.deliver(esc.operator_notice(&policy).into_iter().collect(), &policy, now);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::AlertPriority;
    use crate::notify::{DeliveryError, TemplateId};
    use crate::testkit::{fixture, t0};
    use crate::types::{BackupRequest, Decision, TripStatus};
    use chrono::Duration;

    #[test]
    fn sweep_starts_trips_that_require_backup() {
        let fx = fixture();
        let mut trip = fx.trip("trip-1", 10);
        trip.requires_backup = true;
        fx.put_trip(&trip);
        fx.trip("trip-2", 10);
        fx.approve("trip-1", "g1", 90.0);

        let report = run_once(&fx.orch, t0()).unwrap();
        assert_eq!(report.triggered, 1);
        assert_eq!(fx.requests("trip-1").len(), 1);
        assert!(fx.requests("trip-2").is_empty());
    }

    #[test]
    fn all_candidates_expiring_escalates_once() {
        let fx = fixture();
        let mut trip = fx.trip("trip-1", 3);
        trip.requires_backup = true;
        fx.put_trip(&trip);
        fx.approve("trip-1", "g1", 90.0);
        fx.approve("trip-1", "g2", 80.0);
        fx.approve("trip-1", "g3", 70.0);

        run_once(&fx.orch, t0()).unwrap();
        let mut now = t0();
        for _ in 0..3 {
            now += Duration::hours(25);
            let report = run_once(&fx.orch, now).unwrap();
            assert_eq!(report.expired, 1);
        }

        let requests = fx.requests("trip-1");
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.status == RequestStatus::Expired));
        assert_eq!(fx.workflow("trip-1").state, AssignmentState::Escalated);

        let alerts = fx.open_alerts("trip-1");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::RequestsExhausted);
        // Escalated at t0+75h; the trip starts at t0+72h.
        assert_eq!(alerts[0].priority, AlertPriority::Critical);

        for _ in 0..3 {
            now += Duration::hours(2);
            let report = run_once(&fx.orch, now).unwrap();
            assert_eq!(report.escalated, 0);
        }
        assert_eq!(fx.open_alerts("trip-1").len(), 1);
        assert_eq!(fx.notifier.sent_with(TemplateId::OperatorAlert).len(), 1);
    }

    #[test]
    fn second_pass_at_same_instant_changes_nothing() {
        let fx = fixture();
        let mut trip = fx.trip("trip-1", 10);
        trip.requires_backup = true;
        fx.put_trip(&trip);
        fx.approve("trip-1", "g1", 90.0);

        run_once(&fx.orch, t0()).unwrap();
        let now = t0() + Duration::hours(30);
        let first = run_once(&fx.orch, now).unwrap();
        assert_eq!(first.expired, 1);
        assert_eq!(first.escalated, 1);

        let requests = fx.requests("trip-1");
        let alerts = fx.open_alerts("trip-1");
        let second = run_once(&fx.orch, now).unwrap();
        assert_eq!(second.expired, 0);
        assert_eq!(second.triggered, 0);
        assert_eq!(second.escalated, 0);
        assert_eq!(fx.requests("trip-1"), requests);
        assert_eq!(fx.open_alerts("trip-1"), alerts);
    }

    #[test]
    fn empty_pool_is_retried_on_interval() {
        let fx = fixture();
        let mut trip = fx.trip("trip-1", 10);
        trip.requires_backup = true;
        fx.put_trip(&trip);

        let first = run_once(&fx.orch, t0()).unwrap();
        assert_eq!(first.triggered, 1);
        assert_eq!(first.escalated, 1);

        // Inside the retry interval: nothing happens.
        let quiet = run_once(&fx.orch, t0() + Duration::minutes(30)).unwrap();
        assert_eq!(quiet.triggered, 0);

        // A candidate shows up; the next retry picks them.
        fx.approve("trip-1", "g1", 90.0);
        let retry = run_once(&fx.orch, t0() + Duration::hours(1)).unwrap();
        assert_eq!(retry.triggered, 1);
        assert_eq!(fx.requests("trip-1").len(), 1);
        assert_eq!(fx.workflow("trip-1").state, AssignmentState::Requesting);
    }

    #[test]
    fn exhaustion_after_empty_pool_leaves_one_open_alert() {
        let fx = fixture();
        let mut trip = fx.trip("trip-1", 10);
        trip.requires_backup = true;
        fx.put_trip(&trip);
        fx.set_policy(|p| p.max_requests_per_trip = 1);

        run_once(&fx.orch, t0()).unwrap();
        assert_eq!(fx.open_alerts("trip-1")[0].alert_type, AlertType::NoCandidates);

        fx.approve("trip-1", "g1", 90.0);
        fx.approve("trip-1", "g2", 80.0);
        run_once(&fx.orch, t0() + Duration::hours(1)).unwrap();
        assert!(fx.open_alerts("trip-1").is_empty());

        let request = fx.requests("trip-1")[0].id;
        fx.orch
            .respond(request, Decision::Decline, t0() + Duration::hours(2))
            .unwrap();
        run_once(&fx.orch, t0() + Duration::hours(3)).unwrap();

        assert_eq!(fx.workflow("trip-1").state, AssignmentState::Escalated);
        let open = fx.open_alerts("trip-1");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].alert_type, AlertType::RequestsExhausted);
    }

    #[test]
    fn covered_trip_resolves_open_alerts() {
        let fx = fixture();
        fx.trip("trip-1", 10);
        fx.orch
            .trigger("trip-1", TriggerReason::BackupRequired, None, t0())
            .unwrap();
        assert_eq!(fx.open_alerts("trip-1").len(), 1);

        fx.approve("trip-1", "g1", 90.0);
        fx.orch
            .assign_manually("trip-1", "g1", t0() + Duration::hours(1))
            .unwrap();

        let report = run_once(&fx.orch, t0() + Duration::hours(2)).unwrap();
        assert_eq!(report.alerts_resolved, 1);
        assert!(fx.open_alerts("trip-1").is_empty());
    }

    #[test]
    fn backup_without_accepted_request_is_flagged() {
        let fx = fixture();
        let mut trip = fx.trip("trip-1", 10);
        trip.backup_guide_id = Some("g1".into());
        fx.put_trip(&trip);

        let report = run_once(&fx.orch, t0()).unwrap();
        assert_eq!(report.inconsistencies, 1);
        let alerts = fx.open_alerts("trip-1");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::InconsistentState);

        let again = run_once(&fx.orch, t0() + Duration::hours(1)).unwrap();
        assert_eq!(again.inconsistencies, 0);
        assert_eq!(fx.open_alerts("trip-1").len(), 1);
    }

    #[test]
    fn cancelled_trip_withdraws_pending_offers() {
        let fx = fixture();
        fx.trip("trip-1", 10);
        fx.approve("trip-1", "g1", 90.0);
        fx.orch
            .trigger("trip-1", TriggerReason::GuideCancelled, None, t0())
            .unwrap();

        let mut trip = fx.trip_row("trip-1");
        trip.status = TripStatus::Cancelled;
        fx.put_trip(&trip);

        let report = run_once(&fx.orch, t0() + Duration::hours(1)).unwrap();
        assert_eq!(report.withdrawn, 1);
        assert_eq!(fx.requests("trip-1")[0].status, RequestStatus::Superseded);
        assert_eq!(fx.workflow("trip-1").state, AssignmentState::Idle);
        assert_eq!(fx.notifier.sent_with(TemplateId::RequestWithdrawn).len(), 1);
    }

    #[test]
    fn master_switch_off_freezes_uncovered_trips() {
        let fx = fixture();
        fx.trip("trip-1", 10);
        fx.approve("trip-1", "g1", 90.0);
        fx.orch
            .trigger("trip-1", TriggerReason::GuideCancelled, None, t0())
            .unwrap();
        fx.set_policy(|p| p.enabled = false);

        let report = run_once(&fx.orch, t0() + Duration::hours(30)).unwrap();
        assert_eq!(report.expired, 0);
        assert!(fx.requests("trip-1")[0].is_pending());
    }

    #[test]
    fn sweep_retries_queued_notifications() {
        let fx = fixture();
        fx.trip("trip-1", 10);
        fx.approve("trip-1", "g1", 90.0);
        fx.notifier
            .fail_next(DeliveryError::Retryable("gateway timeout".into()));
        fx.orch
            .trigger("trip-1", TriggerReason::GuideCancelled, None, t0())
            .unwrap();
        assert!(fx.notifier.sent().is_empty());

        let report = run_once(&fx.orch, t0() + Duration::hours(1)).unwrap();
        assert_eq!(report.notifications.delivered, 1);
        assert_eq!(fx.notifier.sent_with(TemplateId::BackupRequest).len(), 1);
    }

    #[test]
    fn accepted_request_without_backup_is_flagged() {
        let fx = fixture();
        fx.trip("trip-1", 10);
        let mut request = BackupRequest::issue("trip-1", "g1", 90.0, t0(), Duration::hours(24), 1);
        request.close(RequestStatus::Accepted, t0());
        {
            let txn = fx.store.write().unwrap();
            txn.put_request(&request).unwrap();
            txn.commit().unwrap();
        }
        let report = run_once(&fx.orch, t0()).unwrap();
        assert_eq!(report.inconsistencies, 1);
        assert_eq!(fx.open_alerts("trip-1")[0].alert_type, AlertType::InconsistentState);
    }
}
