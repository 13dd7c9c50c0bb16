//! Composition root for the visit guard.
//!
//! `GuardRuntime::start` builds the guard from configuration, restores the
//! persisted permanent bans, loads the country mask and starts the sweeper.
//! `GuardRuntime::close` stops every background task and then writes the
//! permanent bans back to disk.

use crate::config::Config;
use crate::error::{BanListError, StartupError};
use crate::http::AppState;
use crate::lifecycle::{Lifecycle, ShutdownReport};
use crate::security::{CountryMaskIndex, GuardSettings, VisitGuard, ban_list, run_sweeper};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Time background tasks get to exit before they are aborted.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Running guard plus its background tasks.
pub struct GuardRuntime {
    guard: Arc<VisitGuard>,
    country_mask: Arc<CountryMaskIndex>,
    ban_list_path: PathBuf,
    enforce_country_mask: bool,
    trust_forwarded_for: bool,
    shutdown_requested: Arc<Notify>,
    lifecycle: Lifecycle,
}

impl GuardRuntime {
    /// Build and start the guard.
    ///
    /// Must be called from within a tokio runtime. A ban list that cannot
    /// be decoded aborts startup only when
    /// `persistence.abort_on_corrupt` is set; otherwise the service starts
    /// with no permanent bans.
    pub fn start(config: &Config) -> Result<Self, StartupError> {
        let settings = GuardSettings::from_config(&config.guard)?;
        let guard = Arc::new(VisitGuard::new(settings));

        let ban_list_path = config.persistence.ban_list_path.clone();
        match ban_list::load(&ban_list_path) {
            Ok(addrs) => {
                let restored = guard.restore_permanent_bans(addrs);
                info!(path = %ban_list_path.display(), count = restored, "permanent bans restored");
            }
            Err(e) if config.persistence.abort_on_corrupt => {
                error!(path = %ban_list_path.display(), error = %e, "ban list unreadable, aborting");
                return Err(e.into());
            }
            Err(e) => {
                warn!(
                    path = %ban_list_path.display(),
                    error = %e,
                    "ban list unreadable, starting with no permanent bans"
                );
            }
        }

        let country_mask = match &config.country_mask.path {
            Some(path) => CountryMaskIndex::load(path)?,
            None => CountryMaskIndex::empty(),
        };
        if config.country_mask.enforce && country_mask.is_empty() {
            warn!("country mask enforcement requested but the mask has no ranges, not enforcing");
        }

        let mut lifecycle = Lifecycle::new();
        {
            let guard = Arc::clone(&guard);
            let period = guard.settings().cycle();
            lifecycle.spawn("sweeper", move |signal| run_sweeper(guard, period, signal));
        }

        info!(
            limit = settings.limit(),
            cycle_secs = settings.cycle().as_secs(),
            ban_minutes = settings.ban_minutes(),
            allowance = settings.per_cycle_allowance(),
            "visit guard started"
        );

        Ok(Self {
            guard,
            country_mask: Arc::new(country_mask),
            ban_list_path,
            enforce_country_mask: config.country_mask.enforce,
            trust_forwarded_for: config.http.trust_forwarded_for,
            shutdown_requested: Arc::new(Notify::new()),
            lifecycle,
        })
    }

    pub fn guard(&self) -> &Arc<VisitGuard> {
        &self.guard
    }

    pub fn country_mask(&self) -> &Arc<CountryMaskIndex> {
        &self.country_mask
    }

    /// Shared state for the HTTP layer.
    pub fn app_state(&self) -> AppState {
        AppState {
            guard: Arc::clone(&self.guard),
            country_mask: Arc::clone(&self.country_mask),
            enforce_country_mask: self.enforce_country_mask,
            trust_forwarded_for: self.trust_forwarded_for,
            shutdown_requested: Arc::clone(&self.shutdown_requested),
        }
    }

    /// Resolves once an operator asks for shutdown through the admin surface.
    pub fn shutdown_requested(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown_requested)
    }

    /// Write the current permanent bans to the configured path.
    pub fn save_bans(&self) -> Result<usize, BanListError> {
        let bans = self.guard.permanent_bans();
        ban_list::save(&self.ban_list_path, &bans)?;
        Ok(bans.len())
    }

    /// Stop background tasks, then persist permanent bans.
    ///
    /// A failed save is logged and does not prevent shutdown.
    pub async fn close(mut self) -> ShutdownReport {
        let report = self.lifecycle.shutdown(SHUTDOWN_GRACE).await;
        if let Err(e) = self.save_bans() {
            error!(path = %self.ban_list_path.display(), error = %e, "failed to save permanent bans");
        }
        report
    }
}
