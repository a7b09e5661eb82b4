//! Engine facade: one opened project root with its config, store and
//! orchestrator. The CLI and server both go through this.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{Config, NotificationConfig};
use crate::error::{EngineError, Result};
use crate::escalation::{self, AdminAlert};
use crate::io;
use crate::notify::{Dispatcher, LogNotifier, Notifier, RetrySchedule, WebhookNotifier};
use crate::orchestrator::{Orchestrator, ResponseOutcome, TriggerOutcome, TripSnapshot};
use crate::paths;
use crate::policy::{self, AutomationPolicy, PolicyUpdate};
use crate::roster::{self, ImportReport, Roster};
use crate::store::{Store, StoreView};
use crate::sweep::{self, SweepReport};
use crate::types::{BackupApplication, BackupRequest, Decision, Guide, Trip, TriggerReason};

pub struct Engine {
    root: PathBuf,
    config: Config,
    orchestrator: Orchestrator,
}

impl Engine {
    /// Create `.standby/` with a default config and an empty database.
    /// Returns false when the project was already initialized.
    pub fn init(root: &Path) -> Result<bool> {
        io::ensure_dir(&paths::standby_dir(root))?;
        let yaml = serde_yaml::to_string(&Config::default())?;
        let created = io::write_if_missing(&paths::config_path(root), yaml.as_bytes())?;
        Store::open(&paths::db_path(root))?;
        Ok(created)
    }

    /// Open an initialized root, delivering notifications as the config says.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Self::load_config(root)?;
        let notifier = notifier_for(&config.notifications)?;
        Self::assemble(root, config, notifier)
    }

    /// Open with an explicit notifier, ignoring the configured webhook.
    pub fn open_with(root: &Path, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let config = Self::load_config(root)?;
        Self::assemble(root, config, notifier)
    }

    fn load_config(root: &Path) -> Result<Config> {
        if !paths::standby_dir(root).is_dir() {
            return Err(EngineError::NotInitialized);
        }
        let config = Config::load(root)?;
        for warning in config.validate() {
            tracing::warn!(level = ?warning.level, "{}", warning.message);
        }
        config.ensure_valid()?;
        Ok(config)
    }

    fn assemble(root: &Path, config: Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let store = Arc::new(Store::open(&paths::db_path(root))?);
        let dispatcher = Dispatcher::new(notifier, RetrySchedule::from(&config.notifications));
        Ok(Self {
            root: root.to_path_buf(),
            config,
            orchestrator: Orchestrator::new(store, dispatcher),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        self.orchestrator.store()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.config.sweep_interval_secs.max(1))
    }

    // -- orchestration -------------------------------------------------------

    pub fn trigger(
        &self,
        trip_id: &str,
        reason: TriggerReason,
        prior_guide_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome> {
        self.orchestrator
            .trigger(trip_id, reason, prior_guide_name, now)
    }

    pub fn respond(
        &self,
        request_id: Uuid,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<ResponseOutcome> {
        self.orchestrator.respond(request_id, decision, now)
    }

    pub fn assign(&self, trip_id: &str, guide_id: &str, now: DateTime<Utc>) -> Result<TriggerOutcome> {
        self.orchestrator.assign_manually(trip_id, guide_id, now)
    }

    pub fn trip(&self, trip_id: &str) -> Result<TripSnapshot> {
        self.orchestrator.snapshot(trip_id)
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        sweep::run_once(&self.orchestrator, now)
    }

    // -- records -------------------------------------------------------------

    pub fn trips(&self) -> Result<Vec<Trip>> {
        self.store().read()?.trips()
    }

    pub fn guides(&self) -> Result<Vec<Guide>> {
        self.store().read()?.guides()
    }

    pub fn request(&self, id: Uuid) -> Result<BackupRequest> {
        self.store()
            .read()?
            .request(id)?
            .ok_or_else(|| EngineError::RequestNotFound(id.to_string()))
    }

    pub fn requests(&self, trip_id: &str) -> Result<Vec<BackupRequest>> {
        let view = self.store().read()?;
        if view.trip(trip_id)?.is_none() {
            return Err(EngineError::TripNotFound(trip_id.to_string()));
        }
        view.requests_for_trip(trip_id)
    }

    pub fn import(&self, roster: &Roster) -> Result<ImportReport> {
        roster::import(self.store(), roster)
    }

    pub fn upsert_trip(&self, trip: Trip) -> Result<Trip> {
        roster::upsert_trip(self.store(), trip)
    }

    pub fn upsert_guide(&self, guide: Guide) -> Result<Guide> {
        roster::upsert_guide(self.store(), guide)
    }

    pub fn upsert_application(&self, app: BackupApplication) -> Result<BackupApplication> {
        roster::upsert_application(self.store(), app)
    }

    // -- policy --------------------------------------------------------------

    pub fn policy(&self) -> Result<AutomationPolicy> {
        policy::current(self.store())
    }

    pub fn update_policy(&self, update: &PolicyUpdate, now: DateTime<Utc>) -> Result<AutomationPolicy> {
        policy::update(self.store(), update, now)
    }

    pub fn policy_history(&self) -> Result<Vec<AutomationPolicy>> {
        policy::history(self.store())
    }

    // -- alerts --------------------------------------------------------------

    pub fn alerts(&self, status: Option<&str>) -> Result<Vec<AdminAlert>> {
        escalation::list(self.store(), status)
    }

    pub fn alert(&self, id: Uuid) -> Result<AdminAlert> {
        escalation::get(self.store(), id)
    }

    pub fn resolve_alert(
        &self,
        id: Uuid,
        resolution: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<AdminAlert> {
        escalation::resolve(self.store(), id, resolution, now)
    }
}

/// Webhook delivery when a URL is configured, log-only otherwise.
pub fn notifier_for(cfg: &NotificationConfig) -> Result<Arc<dyn Notifier>> {
    match &cfg.webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(cfg.webhook_timeout_secs),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}
