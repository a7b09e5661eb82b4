use crate::output::{print_json, print_table, truncate, when};
use chrono::Utc;
use clap::Subcommand;
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Subcommand tree
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum AlertSubcommand {
    /// List alerts (default: open only)
    List {
        /// Filter by status: open | resolved | all
        #[arg(long, default_value = "open")]
        status: String,
    },

    /// Show details of a single alert
    Show { id: Uuid },

    /// Resolve an alert with a note
    Resolve {
        id: Uuid,

        /// Human-readable resolution notes
        resolution: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcommand: AlertSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = super::open(root)?;
    match subcommand {
        AlertSubcommand::List { status } => {
            let alerts = engine.alerts(Some(status.as_str()))?;
            if json {
                return print_json(&alerts);
            }
            if alerts.is_empty() {
                println!("no alerts (status: {status})");
                return Ok(());
            }
            print_table(
                &["ID", "TRIP", "TYPE", "PRIORITY", "CREATED", "MESSAGE"],
                alerts
                    .iter()
                    .map(|a| {
                        vec![
                            a.id.to_string(),
                            a.trip_id.clone(),
                            a.alert_type.to_string(),
                            a.priority.to_string(),
                            when(Some(a.created_at)),
                            truncate(&a.message, 60),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }

        AlertSubcommand::Show { id } => {
            let a = engine.alert(id)?;
            if json {
                return print_json(&a);
            }
            println!("ID:       {}", a.id);
            println!("Trip:     {}", a.trip_id);
            println!("Type:     {}", a.alert_type);
            println!("Priority: {}", a.priority);
            println!("Message:  {}", a.message);
            println!("Created:  {}", when(Some(a.created_at)));
            if let Some(res) = &a.resolution {
                println!("Resolved: {} ({})", res, when(a.resolved_at));
            }
            Ok(())
        }

        AlertSubcommand::Resolve { id, resolution } => {
            let a = engine.resolve_alert(
                id,
                resolution.unwrap_or_else(|| "resolved by operator".into()),
                Utc::now(),
            )?;
            if json {
                return print_json(&a);
            }
            println!("resolved alert {} for trip {}", a.id, a.trip_id);
            Ok(())
        }
    }
}
