use crate::output::{print_json, print_table, truncate, when};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum TripSubcommand {
    /// List trips with their backup coverage
    List,

    /// Show a trip with its workflow state, requests and alerts
    Show { id: String },

    /// List backup requests issued for a trip
    Requests { id: String },
}

pub fn run(root: &Path, subcommand: TripSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = super::open(root)?;
    match subcommand {
        TripSubcommand::List => {
            let trips = engine.trips()?;
            if json {
                return print_json(&trips);
            }
            if trips.is_empty() {
                println!("no trips");
                return Ok(());
            }
            print_table(
                &["ID", "STATUS", "STARTS", "PRIMARY", "BACKUP", "TITLE"],
                trips
                    .iter()
                    .map(|t| {
                        vec![
                            t.id.clone(),
                            t.status.to_string(),
                            when(Some(t.starts_at)),
                            t.primary_guide_id.clone().unwrap_or_else(|| "-".into()),
                            t.backup_guide_id.clone().unwrap_or_else(|| "-".into()),
                            truncate(&t.title, 40),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }

        TripSubcommand::Show { id } => {
            let snap = engine.trip(&id)?;
            if json {
                return print_json(&snap);
            }
            let t = &snap.trip;
            println!("Trip:     {} {}", t.id, t.title);
            println!("Status:   {}", t.status);
            println!("Starts:   {}", when(Some(t.starts_at)));
            println!("Primary:  {}", t.primary_guide_id.as_deref().unwrap_or("-"));
            println!("Backup:   {}", t.backup_guide_id.as_deref().unwrap_or("-"));
            println!("State:    {}", snap.state);
            if let Some(w) = &snap.workflow {
                if let Some(reason) = w.reason {
                    println!("Reason:   {reason}");
                }
                println!("Attempt:  {}", when(w.last_attempt_at));
            }
            if !snap.requests.is_empty() {
                println!();
                print_requests(&snap.requests);
            }
            let open: Vec<_> = snap.alerts.iter().filter(|a| a.is_open()).collect();
            if !open.is_empty() {
                println!();
                for a in open {
                    println!("alert {} [{}] {}", a.id, a.priority, a.message);
                }
            }
            Ok(())
        }

        TripSubcommand::Requests { id } => {
            let requests = engine.requests(&id)?;
            if json {
                return print_json(&requests);
            }
            if requests.is_empty() {
                println!("no backup requests for {id}");
                return Ok(());
            }
            print_requests(&requests);
            Ok(())
        }
    }
}

fn print_requests(requests: &[standby_core::types::BackupRequest]) {
    print_table(
        &["REQUEST", "GUIDE", "SCORE", "STATUS", "DEADLINE", "ORIGIN"],
        requests
            .iter()
            .map(|r| {
                vec![
                    r.id.to_string(),
                    r.guide_id.clone(),
                    format!("{:.1}", r.match_score),
                    r.status.to_string(),
                    when(Some(r.response_deadline)),
                    format!("{:?}", r.origin).to_lowercase(),
                ]
            })
            .collect(),
    );
}
