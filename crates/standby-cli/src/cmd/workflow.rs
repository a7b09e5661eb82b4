use chrono::Utc;
use standby_core::orchestrator::Effect;
use standby_core::types::{AssignmentState, Decision, TriggerReason};
use std::path::Path;
use uuid::Uuid;

pub fn trigger(
    root: &Path,
    trip: &str,
    reason: &str,
    prior_guide: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let reason: TriggerReason = reason.parse()?;
    let engine = super::open(root)?;
    let out = engine.trigger(trip, reason, prior_guide, Utc::now())?;
    if json {
        return crate::output::print_json(&out);
    }
    println!("{}: {}", out.trip_id, describe(&out.effect));
    print_state(out.state);
    Ok(())
}

pub fn respond(root: &Path, request: Uuid, decision: &str, json: bool) -> anyhow::Result<()> {
    let decision: Decision = decision.parse()?;
    let engine = super::open(root)?;
    let out = engine.respond(request, decision, Utc::now())?;
    if json {
        return crate::output::print_json(&out);
    }
    println!(
        "request {} ({} → {}): {}",
        out.answered.id,
        out.answered.guide_id,
        out.answered.status,
        describe(&out.effect)
    );
    print_state(out.state);
    Ok(())
}

pub fn assign(root: &Path, trip: &str, guide: &str, json: bool) -> anyhow::Result<()> {
    let engine = super::open(root)?;
    let out = engine.assign(trip, guide, Utc::now())?;
    if json {
        return crate::output::print_json(&out);
    }
    println!("{}: {}", out.trip_id, describe(&out.effect));
    Ok(())
}

fn print_state(state: AssignmentState) {
    println!("  state: {state}");
}

/// One-line human summary of what a call did.
pub fn describe(effect: &Effect) -> String {
    match effect {
        Effect::Requested { request } => format!(
            "asked {} to back up (request {}, respond by {})",
            request.guide_id,
            request.id,
            request.response_deadline.format("%Y-%m-%d %H:%M UTC")
        ),
        Effect::Escalated {
            alert,
            alert_created,
        } => {
            let suffix = if *alert_created { "" } else { " (alert already open)" };
            format!(
                "escalated [{}] {}: {}{suffix}",
                alert.priority, alert.alert_type, alert.message
            )
        }
        Effect::Assigned { guide_id } => format!("assigned backup guide {guide_id}"),
        Effect::SlotAlreadyFilled { guide_id } => {
            format!("slot already filled by {guide_id}; request superseded")
        }
        Effect::InProgress { request_id } => format!("request {request_id} is still outstanding"),
        Effect::AlreadyAssigned { guide_id } => format!("already covered by {guide_id}"),
        Effect::Ignored { reason } => format!("ignored: {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_ignored_and_assigned() {
        assert_eq!(
            describe(&Effect::Ignored {
                reason: "request already declined".into()
            }),
            "ignored: request already declined"
        );
        assert_eq!(
            describe(&Effect::Assigned {
                guide_id: "aiko".into()
            }),
            "assigned backup guide aiko"
        );
    }
}
