mod cmd;
mod output;
mod root;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use cmd::{
    alert::AlertSubcommand, config::ConfigSubcommand, policy::PolicySubcommand,
    trip::TripSubcommand,
};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "standby",
    about = "Backup-guide assignment and escalation engine",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .standby/)
    #[arg(long, global = true, env = "STANDBY_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .standby/ with a default config and an empty database
    Init,

    /// Load guides, trips and backup applications from a YAML roster
    Import {
        /// Roster file
        file: PathBuf,
    },

    /// Inspect trips
    Trip {
        #[command(subcommand)]
        subcommand: TripSubcommand,
    },

    /// Start (or re-enter) the backup workflow for a trip
    Trigger {
        trip: String,

        /// guide_cancelled | backup_required | manual
        #[arg(long, default_value = "manual")]
        reason: String,

        /// Name of the guide being replaced, shown in request notices
        #[arg(long)]
        prior_guide: Option<String>,
    },

    /// Record a candidate's answer to a backup request
    Respond {
        request: Uuid,

        /// accept | decline
        decision: String,
    },

    /// Assign a backup guide directly (operator override)
    Assign { trip: String, guide: String },

    /// Manage operator alerts
    Alert {
        #[command(subcommand)]
        subcommand: AlertSubcommand,
    },

    /// Show or change the automation policy
    Policy {
        #[command(subcommand)]
        subcommand: PolicySubcommand,
    },

    /// Run one sweep pass: expire overdue requests, retry stalled trips
    Sweep {
        /// Evaluate as of this instant (RFC 3339) instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Inspect process configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Serve the HTTP API and run the sweep on its interval
    Serve {
        /// Port to listen on (default: server.port from config)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Import { file } => cmd::import::run(&root, &file, cli.json),
        Commands::Trip { subcommand } => cmd::trip::run(&root, subcommand, cli.json),
        Commands::Trigger {
            trip,
            reason,
            prior_guide,
        } => cmd::workflow::trigger(&root, &trip, &reason, prior_guide, cli.json),
        Commands::Respond { request, decision } => {
            cmd::workflow::respond(&root, request, &decision, cli.json)
        }
        Commands::Assign { trip, guide } => cmd::workflow::assign(&root, &trip, &guide, cli.json),
        Commands::Alert { subcommand } => cmd::alert::run(&root, subcommand, cli.json),
        Commands::Policy { subcommand } => cmd::policy::run(&root, subcommand, cli.json),
        Commands::Sweep { at } => cmd::sweep::run(&root, at, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
