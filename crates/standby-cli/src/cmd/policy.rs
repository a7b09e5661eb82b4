use crate::output::{print_json, print_table, when};
use chrono::Utc;
use clap::Subcommand;
use standby_core::policy::{AutomationPolicy, PolicyUpdate};
use std::path::Path;

#[derive(Subcommand)]
pub enum PolicySubcommand {
    /// Show the current policy
    Show,

    /// Change policy fields; unset flags keep their value
    Set {
        /// Master switch for the engine
        #[arg(long)]
        enabled: Option<bool>,
        /// Requests issued per trip before escalating
        #[arg(long)]
        max_requests: Option<u32>,
        /// Seconds a candidate has to answer
        #[arg(long)]
        response_timeout: Option<u64>,
        /// Seconds between sweep retries of a trip with no candidates
        #[arg(long)]
        retry_interval: Option<u64>,
        #[arg(long)]
        escalation: Option<bool>,
        #[arg(long)]
        auto_assignment: Option<bool>,
        #[arg(long)]
        notifications: Option<bool>,
    },

    /// List every policy version
    History,
}

pub fn run(root: &Path, subcommand: PolicySubcommand, json: bool) -> anyhow::Result<()> {
    let engine = super::open(root)?;
    match subcommand {
        PolicySubcommand::Show => {
            let policy = engine.policy()?;
            if json {
                return print_json(&policy);
            }
            print_policy(&policy);
            Ok(())
        }

        PolicySubcommand::Set {
            enabled,
            max_requests,
            response_timeout,
            retry_interval,
            escalation,
            auto_assignment,
            notifications,
        } => {
            let update = PolicyUpdate {
                enabled,
                max_requests_per_trip: max_requests,
                response_timeout_secs: response_timeout,
                retry_interval_secs: retry_interval,
                escalation_enabled: escalation,
                auto_assignment_enabled: auto_assignment,
                notification_enabled: notifications,
            };
            if update.is_empty() {
                anyhow::bail!("nothing to change: pass at least one flag");
            }
            let policy = engine.update_policy(&update, Utc::now())?;
            if json {
                return print_json(&policy);
            }
            println!("policy updated to version {}", policy.version);
            print_policy(&policy);
            Ok(())
        }

        PolicySubcommand::History => {
            let history = engine.policy_history()?;
            if json {
                return print_json(&history);
            }
            if history.is_empty() {
                println!("no policy changes yet (defaults in effect)");
                return Ok(());
            }
            print_table(
                &["VERSION", "ENABLED", "MAX", "TIMEOUT", "RETRY", "UPDATED"],
                history
                    .iter()
                    .map(|p| {
                        vec![
                            p.version.to_string(),
                            p.enabled.to_string(),
                            p.max_requests_per_trip.to_string(),
                            format!("{}s", p.response_timeout.as_secs()),
                            format!("{}s", p.retry_interval.as_secs()),
                            when(Some(p.updated_at)),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }
    }
}

fn print_policy(p: &AutomationPolicy) {
    println!("version:                 {}", p.version);
    println!("enabled:                 {}", p.enabled);
    println!("max_requests_per_trip:   {}", p.max_requests_per_trip);
    println!("response_timeout_secs:   {}", p.response_timeout.as_secs());
    println!("retry_interval_secs:     {}", p.retry_interval.as_secs());
    println!("escalation_enabled:      {}", p.escalation_enabled);
    println!("auto_assignment_enabled: {}", p.auto_assignment_enabled);
    println!("notification_enabled:    {}", p.notification_enabled);
}
