//! Candidate matcher: ranks the pre-approved backup pool for a trip.
//!
//! Only `approved` applications whose guide exists, is active and is not
//! flagged unavailable are eligible. The trip's own primary guide is never a
//! candidate. Order is match score descending, then earliest application,
//! then guide id, so the same pool always yields the same sequence.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::store::StoreView;
use crate::types::{ApplicationStatus, Trip};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub guide_id: String,
    pub match_score: f64,
    pub applied_at: DateTime<Utc>,
}

/// Ranked, deduplicated candidates for `trip`. Empty when nobody is eligible.
pub fn rank_candidates(view: &impl StoreView, trip: &Trip) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    for app in view.applications_for_trip(&trip.id)? {
        if app.status != ApplicationStatus::Approved {
            continue;
        }
        if trip.primary_guide_id.as_deref() == Some(app.guide_id.as_str()) {
            continue;
        }
        let eligible = view
            .guide(&app.guide_id)?
            .is_some_and(|g| g.is_eligible());
        if !eligible {
            continue;
        }
        candidates.push(Candidate {
            guide_id: app.guide_id,
            match_score: app.match_score,
            applied_at: app.applied_at,
        });
    }

    candidates.sort_by(compare);
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.guide_id.clone()));
    Ok(candidates)
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    b.match_score
        .total_cmp(&a.match_score)
        .then_with(|| a.applied_at.cmp(&b.applied_at))
        .then_with(|| a.guide_id.cmp(&b.guide_id))
}
