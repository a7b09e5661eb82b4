use chrono::{DateTime, Utc};
use std::path::Path;

pub fn run(root: &Path, at: Option<DateTime<Utc>>, json: bool) -> anyhow::Result<()> {
    let engine = super::open(root)?;
    let report = engine.sweep(at.unwrap_or_else(Utc::now))?;
    if json {
        return crate::output::print_json(&report);
    }
    println!(
        "swept {} trip(s): {} expired, {} triggered, {} resumed, {} escalated",
        report.trips_scanned, report.expired, report.triggered, report.resumed, report.escalated
    );
    if report.withdrawn + report.alerts_resolved + report.inconsistencies > 0 {
        println!(
            "  {} withdrawn, {} alert(s) resolved, {} inconsistency alert(s)",
            report.withdrawn, report.alerts_resolved, report.inconsistencies
        );
    }
    let n = report.notifications;
    if n.delivered + n.queued + n.dropped > 0 {
        println!(
            "  notification retries: {} delivered, {} requeued, {} dropped",
            n.delivered, n.queued, n.dropped
        );
    }
    if report.failed > 0 {
        anyhow::bail!("{} trip(s) failed during the sweep; see log", report.failed);
    }
    Ok(())
}
