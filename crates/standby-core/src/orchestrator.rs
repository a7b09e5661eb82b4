//! Assignment orchestrator: the per-trip backup state machine.
//!
//! ```text
//! Idle ──trigger──▶ NeedsBackup ──▶ Requesting ──accept──▶ Assigned
//!                        │              │  ▲
//!                        │        decline/expire (budget left, candidate left)
//!                        ▼              ▼
//!                    Escalated ◀── exhausted / no candidates / disabled
//! ```
//!
//! Every transition runs under the trip's in-memory lock and inside one redb
//! write transaction. The trip row is re-read inside that transaction before
//! `backup_guide_id` is written, so "assign only if still unassigned" is a
//! true check-and-set: the loser of a race sees the winner's write and is
//! marked `superseded`. Notifications are sent after commit and never gate
//! the transition.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::escalation::{self, AdminAlert, AlertType};
use crate::matcher::rank_candidates;
use crate::notify::{Dispatcher, Notification, Recipient, TemplateId};
use crate::policy::AutomationPolicy;
use crate::store::{Store, StoreView, WriteTxn};
use crate::types::{
    AssignmentState, BackupRequest, Decision, RequestOrigin, RequestStatus, Trip, TripWorkflow,
    TriggerReason,
};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a call did to the trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    /// A new offer went out.
    Requested { request: BackupRequest },
    /// Automation handed the trip to operators.
    Escalated {
        alert: AdminAlert,
        alert_created: bool,
    },
    /// This call assigned the backup guide.
    Assigned { guide_id: String },
    /// The accept lost the race: another guide already holds the slot.
    SlotAlreadyFilled { guide_id: String },
    /// Trigger while an offer is outstanding.
    InProgress { request_id: Uuid },
    /// Trigger on a trip that already has a backup guide.
    AlreadyAssigned { guide_id: String },
    /// Nothing changed.
    Ignored { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerOutcome {
    pub trip_id: String,
    pub state: AssignmentState,
    #[serde(flatten)]
    pub effect: Effect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseOutcome {
    /// The request that was answered, as stored after this call.
    pub answered: BackupRequest,
    pub state: AssignmentState,
    #[serde(flatten)]
    pub effect: Effect,
}

/// Everything the engine knows about one trip.
#[derive(Debug, Clone, Serialize)]
pub struct TripSnapshot {
    pub trip: Trip,
    pub state: AssignmentState,
    pub workflow: Option<TripWorkflow>,
    pub requests: Vec<BackupRequest>,
    pub alerts: Vec<AdminAlert>,
}

// ---------------------------------------------------------------------------
// Per-trip locks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TripLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TripLocks {
    fn acquire(&self, trip_id: &str) -> TripLock<'_> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let cell = map.entry(trip_id.to_string()).or_default().clone();
        TripLock {
            locks: self,
            trip_id: trip_id.to_string(),
            cell,
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Handle on one trip's mutex. The map entry goes away with the last handle.
pub(crate) struct TripLock<'a> {
    locks: &'a TripLocks,
    trip_id: String,
    cell: Arc<Mutex<()>>,
}

impl TripLock<'_> {
    pub(crate) fn hold(&self) -> MutexGuard<'_, ()> {
        self.cell.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for TripLock<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only made under the map lock: two owners means the map and us.
        if map
            .get(&self.trip_id)
            .is_some_and(|c| Arc::strong_count(c) == 2)
        {
            map.remove(&self.trip_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    store: Arc<Store>,
    dispatcher: Dispatcher,
    locks: TripLocks,
}

impl Orchestrator {
    pub fn new(store: Arc<Store>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            locks: TripLocks::default(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn trip_lock(&self, trip_id: &str) -> TripLock<'_> {
        self.locks.acquire(trip_id)
    }

    pub(crate) fn deliver(&self, notes: Vec<Notification>, policy: &AutomationPolicy, now: DateTime<Utc>) {
        if notes.is_empty() {
            return;
        }
        self.dispatcher
            .dispatch(&self.store, notes, policy.notification_enabled, now);
    }

    /// Start or re-enter the workflow for a trip.
    ///
    /// Idempotent while an offer is outstanding or the trip is covered.
    pub fn trigger(
        &self,
        trip_id: &str,
        reason: TriggerReason,
        prior_guide_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome> {
        let lock = self.trip_lock(trip_id);
        let guard = lock.hold();

        let txn = self.store.write()?;
        let trip = txn
            .trip(trip_id)?
            .ok_or_else(|| EngineError::TripNotFound(trip_id.to_string()))?;
        if !trip.is_active() {
            return Err(EngineError::TripNotActive(trip_id.to_string()));
        }
        let policy = txn.policy()?;
        let mut workflow = txn
            .workflow(trip_id)?
            .unwrap_or_else(|| TripWorkflow::idle(trip_id, now));
        let mut notes = Vec::new();

        let effect = if let Some(guide_id) = trip.backup_guide_id.clone() {
            workflow.transition(AssignmentState::Assigned, now);
            Effect::AlreadyAssigned { guide_id }
        } else if let Some(pending) = txn
            .requests_for_trip(trip_id)?
            .into_iter()
            .find(BackupRequest::is_pending)
        {
            workflow.transition(AssignmentState::Requesting, now);
            Effect::InProgress {
                request_id: pending.id,
            }
        } else {
            workflow.reason = Some(reason);
            if prior_guide_name.is_some() {
                workflow.prior_guide_name = prior_guide_name;
            }
            workflow.transition(AssignmentState::NeedsBackup, now);
            tracing::info!(trip = %trip_id, reason = %reason, "backup needed");
            self.advance(&txn, &trip, &mut workflow, &policy, now, &mut notes)?
        };

        txn.put_workflow(&workflow)?;
        txn.commit()?;
        drop(guard);

        self.deliver(notes, &policy, now);
        Ok(TriggerOutcome {
            trip_id: trip_id.to_string(),
            state: workflow.state,
            effect,
        })
    }

    /// Apply a candidate's accept/decline.
    ///
    /// Responses to requests that are no longer pending, or that arrive after
    /// the deadline, are ignored and reported as such; they never error and
    /// never re-enter the workflow.
    pub fn respond(
        &self,
        request_id: Uuid,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<ResponseOutcome> {
        let trip_id = self
            .store
            .read()?
            .request(request_id)?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.to_string()))?
            .trip_id;

        let lock = self.trip_lock(&trip_id);
        let guard = lock.hold();

        let txn = self.store.write()?;
        let mut request = txn
            .request(request_id)?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.to_string()))?;
        let mut workflow = txn
            .workflow(&trip_id)?
            .unwrap_or_else(|| TripWorkflow::idle(&trip_id, now));

        let ignored = if !request.is_pending() {
            Some(format!("request already {}", request.status))
        } else if now > request.response_deadline {
            Some("response deadline passed".to_string())
        } else {
            None
        };
        if let Some(reason) = ignored {
            tracing::warn!(
                request = %request_id,
                trip = %trip_id,
                decision = %decision,
                reason = %reason,
                "ignoring response"
            );
            return Ok(ResponseOutcome {
                answered: request,
                state: workflow.state,
                effect: Effect::Ignored { reason },
            });
        }

        let mut trip = txn
            .trip(&trip_id)?
            .ok_or_else(|| EngineError::TripNotFound(trip_id.clone()))?;
        let policy = txn.policy()?;
        let mut notes = Vec::new();

        let effect = match decision {
            Decision::Accept if !trip.is_active() => {
                request.close(RequestStatus::Superseded, now);
                txn.put_request(&request)?;
                notes.push(withdrawn_notice(&request, &trip, "trip is no longer running"));
                Effect::Ignored {
                    reason: format!("trip is {}", trip.status),
                }
            }
            Decision::Accept => {
                self.accept(&txn, &mut trip, &mut request, &mut workflow, now, &mut notes)?
            }
            Decision::Decline => {
                request.close(RequestStatus::Declined, now);
                txn.put_request(&request)?;
                tracing::info!(trip = %trip_id, guide = %request.guide_id, "backup request declined");
                if trip.is_active() && trip.backup_guide_id.is_none() {
                    self.advance(&txn, &trip, &mut workflow, &policy, now, &mut notes)?
                } else {
                    Effect::Ignored {
                        reason: "trip needs no further backup".into(),
                    }
                }
            }
        };

        txn.put_workflow(&workflow)?;
        txn.commit()?;
        drop(guard);

        self.deliver(notes, &policy, now);
        Ok(ResponseOutcome {
            answered: request,
            state: workflow.state,
            effect,
        })
    }

    /// Expire an overdue pending request and move on. Only the sweep calls this.
    ///
    /// Returns `None` when the request is gone, already terminal, or not yet due.
    pub(crate) fn expire(&self, request_id: Uuid, now: DateTime<Utc>) -> Result<Option<Effect>> {
        let Some(found) = self.store.read()?.request(request_id)? else {
            return Ok(None);
        };
        let lock = self.trip_lock(&found.trip_id);
        let guard = lock.hold();

        let txn = self.store.write()?;
        let Some(mut request) = txn.request(request_id)? else {
            return Ok(None);
        };
        if !request.is_overdue(now) {
            return Ok(None);
        }
        let trip = txn
            .trip(&request.trip_id)?
            .ok_or_else(|| EngineError::TripNotFound(request.trip_id.clone()))?;
        let policy = txn.policy()?;
        let mut workflow = txn
            .workflow(&trip.id)?
            .unwrap_or_else(|| TripWorkflow::idle(&trip.id, now));
        let mut notes = Vec::new();

        request.close(RequestStatus::Expired, now);
        txn.put_request(&request)?;
        notes.push(withdrawn_notice(&request, &trip, "response deadline passed"));
        tracing::info!(trip = %trip.id, guide = %request.guide_id, "backup request expired");

        let effect = if trip.is_active() && trip.backup_guide_id.is_none() {
            self.advance(&txn, &trip, &mut workflow, &policy, now, &mut notes)?
        } else {
            Effect::Ignored {
                reason: "trip needs no further backup".into(),
            }
        };

        txn.put_workflow(&workflow)?;
        txn.commit()?;
        drop(guard);

        self.deliver(notes, &policy, now);
        Ok(Some(effect))
    }

    /// Operator override: make `guide_id` the trip's backup.
    ///
    /// Uses the same check-and-set as an accepted offer and records an
    /// `accepted` request with origin `manual`, so the trip keeps exactly one
    /// accepted request. Fails if the trip already has a backup.
    pub fn assign_manually(
        &self,
        trip_id: &str,
        guide_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome> {
        let lock = self.trip_lock(trip_id);
        let guard = lock.hold();

        let txn = self.store.write()?;
        let mut trip = txn
            .trip(trip_id)?
            .ok_or_else(|| EngineError::TripNotFound(trip_id.to_string()))?;
        if !trip.is_active() {
            return Err(EngineError::TripNotActive(trip_id.to_string()));
        }
        if txn.guide(guide_id)?.is_none() {
            return Err(EngineError::GuideNotFound(guide_id.to_string()));
        }
        if let Some(current) = &trip.backup_guide_id {
            return Err(EngineError::ConcurrentAssignmentConflict {
                trip_id: trip_id.to_string(),
                guide_id: current.clone(),
            });
        }
        let policy = txn.policy()?;
        let mut workflow = txn
            .workflow(trip_id)?
            .unwrap_or_else(|| TripWorkflow::idle(trip_id, now));
        let mut notes = Vec::new();

        let score = txn
            .application(trip_id, guide_id)?
            .map(|a| a.match_score)
            .unwrap_or_default();
        let mut request = BackupRequest::issue(
            trip_id,
            guide_id,
            score,
            now,
            policy.response_timeout_delta(),
            policy.version,
        );
        request.origin = RequestOrigin::Manual;
        request.close(RequestStatus::Accepted, now);
        workflow.reason = Some(TriggerReason::Manual);

        self.finalize_assignment(&txn, &mut trip, &request, &mut workflow, now, &mut notes)?;
        tracing::info!(trip = %trip_id, guide = %guide_id, "backup guide assigned by operator");

        txn.put_workflow(&workflow)?;
        txn.commit()?;
        drop(guard);

        self.deliver(notes, &policy, now);
        Ok(TriggerOutcome {
            trip_id: trip_id.to_string(),
            state: workflow.state,
            effect: Effect::Assigned {
                guide_id: guide_id.to_string(),
            },
        })
    }

    pub fn snapshot(&self, trip_id: &str) -> Result<TripSnapshot> {
        let view = self.store.read()?;
        let trip = view
            .trip(trip_id)?
            .ok_or_else(|| EngineError::TripNotFound(trip_id.to_string()))?;
        let workflow = view.workflow(trip_id)?;
        let requests = view.requests_for_trip(trip_id)?;
        let alerts = view.alerts_for_trip(trip_id)?;
        Ok(TripSnapshot {
            trip,
            state: workflow.as_ref().map_or(AssignmentState::Idle, |w| w.state),
            workflow,
            requests,
            alerts,
        })
    }

    // -----------------------------------------------------------------------
    // Transition internals (run inside the caller's write transaction)
    // -----------------------------------------------------------------------

    /// Issue the next offer, or escalate when none can be made.
    fn advance(
        &self,
        txn: &WriteTxn,
        trip: &Trip,
        workflow: &mut TripWorkflow,
        policy: &AutomationPolicy,
        now: DateTime<Utc>,
        notes: &mut Vec<Notification>,
    ) -> Result<Effect> {
        workflow.last_attempt_at = Some(now);

        if !policy.automation_active() {
            return self.escalate(txn, trip, workflow, policy, AlertType::AutomationDisabled, "automation disabled", now, notes);
        }

        let requests = txn.requests_for_trip(&trip.id)?;
        let issued = requests
            .iter()
            .filter(|r| r.origin == RequestOrigin::Automatic)
            .count();
        if issued >= policy.max_requests_per_trip as usize {
            let detail = format!("{issued} backup requests issued without an acceptance");
            return self.escalate(txn, trip, workflow, policy, AlertType::RequestsExhausted, &detail, now, notes);
        }

        let asked: HashSet<&str> = requests.iter().map(|r| r.guide_id.as_str()).collect();
        let candidates = rank_candidates(txn, trip)?;
        let Some(next) = candidates
            .iter()
            .find(|c| !asked.contains(c.guide_id.as_str()))
        else {
            let detail = if candidates.is_empty() {
                "no eligible backup guides"
            } else {
                "every eligible backup guide has already been asked"
            };
            return self.escalate(txn, trip, workflow, policy, AlertType::NoCandidates, detail, now, notes);
        };

        let request = BackupRequest::issue(
            &trip.id,
            &next.guide_id,
            next.match_score,
            now,
            policy.response_timeout_delta(),
            policy.version,
        );
        txn.put_request(&request)?;
        workflow.transition(AssignmentState::Requesting, now);
        let cleared = escalation::resolve_open_where(
            txn,
            &trip.id,
            "backup request issued",
            now,
            AlertType::is_workflow_cause,
        )?;
        if !cleared.is_empty() {
            tracing::info!(trip = %trip.id, alerts = cleared.len(), "earlier escalation cleared");
        }
        notes.push(Notification::to_guide(
            &request.guide_id,
            TemplateId::BackupRequest,
            serde_json::json!({
                "request_id": request.id,
                "trip_id": trip.id,
                "trip_title": trip.title,
                "starts_at": trip.starts_at,
                "ends_at": trip.ends_at,
                "response_deadline": request.response_deadline,
                "prior_guide_name": workflow.prior_guide_name,
            }),
        ));
        tracing::info!(
            trip = %trip.id,
            guide = %request.guide_id,
            request = %request.id,
            attempt = issued + 1,
            deadline = %request.response_deadline,
            "backup request issued"
        );
        Ok(Effect::Requested { request })
    }

    #[allow(clippy::too_many_arguments)]
    fn escalate(
        &self,
        txn: &WriteTxn,
        trip: &Trip,
        workflow: &mut TripWorkflow,
        policy: &AutomationPolicy,
        alert_type: AlertType,
        detail: &str,
        now: DateTime<Utc>,
        notes: &mut Vec<Notification>,
    ) -> Result<Effect> {
        // One open workflow alert per trip: a new cause replaces the old one.
        escalation::resolve_open_where(
            txn,
            &trip.id,
            &format!("superseded by {alert_type}"),
            now,
            |t| t.is_workflow_cause() && t != alert_type,
        )?;
        let esc = escalation::escalate(txn, trip, alert_type, detail, policy, now)?;
        workflow.transition(AssignmentState::Escalated, now);
        notes.extend(esc.operator_notice(policy));
        Ok(Effect::Escalated {
            alert: esc.alert,
            alert_created: esc.created,
        })
    }

    fn accept(
        &self,
        txn: &WriteTxn,
        trip: &mut Trip,
        request: &mut BackupRequest,
        workflow: &mut TripWorkflow,
        now: DateTime<Utc>,
        notes: &mut Vec<Notification>,
    ) -> Result<Effect> {
        if let Some(winner) = trip.backup_guide_id.clone() {
            request.close(RequestStatus::Superseded, now);
            txn.put_request(request)?;
            notes.push(Notification::to_guide(
                &request.guide_id,
                TemplateId::SlotFilled,
                serde_json::json!({
                    "request_id": request.id,
                    "trip_id": trip.id,
                    "trip_title": trip.title,
                }),
            ));
            tracing::info!(
                trip = %trip.id,
                guide = %request.guide_id,
                winner = %winner,
                "accept arrived after the slot was filled; superseded"
            );
            return Ok(Effect::SlotAlreadyFilled { guide_id: winner });
        }

        request.close(RequestStatus::Accepted, now);
        self.finalize_assignment(txn, trip, request, workflow, now, notes)?;
        tracing::info!(trip = %trip.id, guide = %request.guide_id, "backup guide assigned");
        Ok(Effect::Assigned {
            guide_id: request.guide_id.clone(),
        })
    }

    /// Write the winning request and the trip's backup, withdraw every other
    /// pending offer, and queue the assignment notices.
    fn finalize_assignment(
        &self,
        txn: &WriteTxn,
        trip: &mut Trip,
        winner: &BackupRequest,
        workflow: &mut TripWorkflow,
        now: DateTime<Utc>,
        notes: &mut Vec<Notification>,
    ) -> Result<()> {
        trip.backup_guide_id = Some(winner.guide_id.clone());
        txn.put_trip(trip)?;
        txn.put_request(winner)?;

        for mut other in txn.requests_for_trip(&trip.id)? {
            // Declined and expired requests keep their terminal status.
            if other.id == winner.id || !other.is_pending() {
                continue;
            }
            other.close(RequestStatus::Superseded, now);
            txn.put_request(&other)?;
            notes.push(withdrawn_notice(&other, trip, "another guide took the slot"));
        }

        if let Some(mut app) = txn.application(&trip.id, &winner.guide_id)? {
            app.assigned = true;
            txn.put_application(&app)?;
        }
        workflow.transition(AssignmentState::Assigned, now);

        let guide_name = txn
            .guide(&winner.guide_id)?
            .map(|g| g.name)
            .unwrap_or_else(|| winner.guide_id.clone());
        let data = serde_json::json!({
            "trip_id": trip.id,
            "trip_title": trip.title,
            "starts_at": trip.starts_at,
            "guide_id": winner.guide_id,
            "guide_name": guide_name,
            "prior_guide_name": workflow.prior_guide_name,
        });
        notes.push(Notification::to_guide(
            &winner.guide_id,
            TemplateId::BackupConfirmed,
            data.clone(),
        ));
        notes.push(Notification::new(
            Recipient::Participants {
                trip_id: trip.id.clone(),
            },
            TemplateId::BackupGuideAssigned,
            data.clone(),
        ));
        notes.push(Notification::new(
            Recipient::Operators,
            TemplateId::OperatorBackupAssigned,
            data,
        ));
        Ok(())
    }
}

pub(crate) fn withdrawn_notice(request: &BackupRequest, trip: &Trip, why: &str) -> Notification {
    Notification::to_guide(
        &request.guide_id,
        TemplateId::RequestWithdrawn,
        serde_json::json!({
            "request_id": request.id,
            "trip_id": trip.id,
            "trip_title": trip.title,
            "status": request.status,
            "reason": why,
        }),
    )
}
