use anyhow::Context;
use standby_core::roster::Roster;
use std::path::Path;

pub fn run(root: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let roster =
        Roster::load(file).with_context(|| format!("failed to read roster {}", file.display()))?;
    let engine = super::open(root)?;
    let report = engine.import(&roster)?;

    if json {
        return crate::output::print_json(&report);
    }
    println!(
        "imported {} guide(s), {} new trip(s), {} updated trip(s), {} application(s)",
        report.guides, report.trips_created, report.trips_updated, report.applications
    );
    Ok(())
}
