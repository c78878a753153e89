//! Dispatch service — the surface the surrounding application talks to.
//!
//! Wires the store, availability tracker, dispatcher, session registry and cycle
//! scheduler together. Only configuration-class errors come back as `Err`;
//! per-destination results are returned (and logged) as [`DispatchOutcome`] data.

use std::sync::Arc;

use castline_core::config::{CastlineConfig, PacingConfig};
use castline_core::error::{CastlineError, Result};
use castline_core::traits::{DestinationStore, OutcomeLog};
use castline_core::types::{
    AvailabilitySummary, CycleRun, Destination, DispatchOutcome, OutcomeStatus,
};
use serde::Serialize;

use crate::availability::AvailabilityTracker;
use crate::dispatch::Dispatcher;
use crate::engine::{CycleScheduler, SchedulerStatus};
use crate::persistence::SqliteStore;
use crate::sessions::SessionRegistry;
use crate::store::MemoryStore;
use crate::timer::{Timer, TokioTimer};

/// Counts shown on an operator dashboard.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardStats {
    pub availability: AvailabilitySummary,
    pub sent_last_24h: u64,
    pub failed_last_24h: u64,
    pub running_chains: usize,
}

pub struct DispatchService {
    store: Arc<dyn DestinationStore>,
    outcomes: Arc<dyn OutcomeLog>,
    availability: Arc<AvailabilityTracker>,
    registry: Arc<SessionRegistry>,
    scheduler: CycleScheduler,
    timer: Arc<dyn Timer>,
    pacing: PacingConfig,
}

impl DispatchService {
    pub fn new(
        store: Arc<dyn DestinationStore>,
        outcomes: Arc<dyn OutcomeLog>,
        registry: Arc<SessionRegistry>,
        timer: Arc<dyn Timer>,
        pacing: PacingConfig,
    ) -> Self {
        let availability = Arc::new(AvailabilityTracker::new(store.clone(), timer.clone()));
        let dispatcher = Dispatcher::new(
            availability.clone(),
            store.clone(),
            outcomes.clone(),
            timer.clone(),
        );
        let scheduler = CycleScheduler::new(
            registry.clone(),
            availability.clone(),
            dispatcher,
            timer.clone(),
        );
        Self {
            store,
            outcomes,
            availability,
            registry,
            scheduler,
            timer,
            pacing,
        }
    }

    /// Build a service from the config file's store and pacing sections.
    /// `store.path` is used as given; expand `~` before calling.
    pub fn from_config(config: &CastlineConfig, registry: Arc<SessionRegistry>) -> Result<Self> {
        config.pacing.validate()?;
        let timer: Arc<dyn Timer> = Arc::new(TokioTimer);
        match config.store.backend.as_str() {
            "sqlite" => {
                let path = std::path::Path::new(&config.store.path);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let store = Arc::new(SqliteStore::open(path)?);
                Ok(Self::new(store.clone(), store, registry, timer, config.pacing.clone()))
            }
            "memory" => {
                let store = Arc::new(MemoryStore::new());
                Ok(Self::new(store.clone(), store, registry, timer, config.pacing.clone()))
            }
            other => Err(CastlineError::config(format!(
                "unknown store backend '{other}' (expected \"sqlite\" or \"memory\")"
            ))),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Default pacing from configuration.
    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    // ── Cycles ─────────────────────────────────────────────

    /// Start the jittered cycle chain for a session. Restarts it if already running.
    pub async fn start_cycles(
        &self,
        session_id: &str,
        template: &str,
        pacing: PacingConfig,
    ) -> Result<()> {
        self.scheduler.start(session_id, template, pacing).await
    }

    /// Stop a session's cycle chain. Stopping a session that is not running is a no-op.
    pub async fn stop_cycles(&self, session_id: &str) -> Result<()> {
        if !self.scheduler.stop(session_id).await {
            tracing::debug!("Stop requested for idle session '{session_id}'");
        }
        Ok(())
    }

    /// Send now to an explicit destination list, using the configured pacing.
    ///
    /// Every id must exist; an unknown id fails the whole call before anything
    /// is sent. Destinations that are currently suppressed are reported as
    /// skipped.
    pub async fn run_one_cycle(
        &self,
        session_id: &str,
        destination_ids: &[String],
        template: &str,
    ) -> Result<Vec<DispatchOutcome>> {
        if template.trim().is_empty() {
            return Err(CastlineError::config("message template is empty"));
        }
        let mut destinations = Vec::with_capacity(destination_ids.len());
        for id in destination_ids {
            let dest = self
                .store
                .load(id)?
                .ok_or_else(|| CastlineError::DestinationNotFound(id.clone()))?;
            destinations.push(dest);
        }
        self.scheduler
            .run_once(session_id, &destinations, template, &self.pacing)
            .await
    }

    pub async fn scheduler_status(&self, session_id: &str) -> SchedulerStatus {
        self.scheduler.status(session_id).await
    }

    /// Recent cycle runs across sessions, newest first.
    pub fn cycle_history(&self, limit: usize) -> Vec<CycleRun> {
        self.scheduler.history(limit)
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    // ── Destinations ───────────────────────────────────────

    pub fn add_destination(&self, destination: Destination) -> Result<()> {
        tracing::info!("➕ Destination added: '{}' ({})", destination.name, destination.id);
        self.store.insert(destination)
    }

    pub fn remove_destination(&self, id: &str) -> Result<bool> {
        let removed = self.store.remove(id)?;
        if removed {
            tracing::info!("➖ Destination removed: {id}");
        }
        Ok(removed)
    }

    pub fn destination(&self, id: &str) -> Result<Option<Destination>> {
        self.store.load(id)
    }

    pub fn destinations(&self) -> Result<Vec<Destination>> {
        self.store.list_all()
    }

    /// Destinations eligible right now (reactivating expired suppressions).
    pub fn list_eligible_destinations(&self) -> Result<Vec<Destination>> {
        self.availability.eligible(None)
    }

    pub fn availability_summary(&self) -> Result<AvailabilitySummary> {
        self.availability.summary()
    }

    /// Move a suppressed destination back to Active. Returns `false` if it was
    /// already Active.
    pub fn reactivate(&self, id: &str) -> Result<bool> {
        self.availability.reactivate(id)
    }

    // ── Outcomes ───────────────────────────────────────────

    pub fn recent_outcomes(&self, limit: usize, offset: usize) -> Result<Vec<DispatchOutcome>> {
        self.outcomes.recent(limit, offset)
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let since = self.timer.now() - chrono::Duration::hours(24);
        let sent_last_24h = self.outcomes.count_since(OutcomeStatus::Sent, since)?;
        let failed_last_24h = self
            .outcomes
            .count_since(OutcomeStatus::FailedRetriesExhausted, since)?
            + self.outcomes.count_since(OutcomeStatus::FailedTerminal, since)?;
        Ok(DashboardStats {
            availability: self.availability.summary()?,
            sent_last_24h,
            failed_last_24h,
            running_chains: self.scheduler.running_count().await,
        })
    }
}
