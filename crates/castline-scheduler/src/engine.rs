//! Cycle Scheduler — one long-lived loop per session that triggers a dispatch
//! cycle immediately on start and then again after a jittered delay, until stopped.
//!
//! Cycles for the same session are serialised through a per-session lock, which
//! manual runs share, so two dispatch rounds never overlap for one session.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use castline_core::config::PacingConfig;
use castline_core::error::{CastlineError, Result};
use castline_core::types::{CycleRun, Destination, DispatchOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::availability::AvailabilityTracker;
use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::sessions::SessionRegistry;
use crate::timer::{StopHandle, StopSignal, Timer, Wake, deadline, jitter};

/// Maximum cycle runs kept in history.
const MAX_HISTORY: usize = 100;

/// Snapshot of one session's cycle chain.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchedulerStatus {
    pub session_id: String,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Progress {
    cycles_completed: u64,
    next_run_at: Option<DateTime<Utc>>,
}

struct Chain {
    stop: StopHandle,
    handle: JoinHandle<()>,
    started_at: DateTime<Utc>,
    progress: Arc<std::sync::Mutex<Progress>>,
}

/// Live chains plus stopped ones whose loop has not exited yet.
#[derive(Default)]
struct Chains {
    active: HashMap<String, Chain>,
    draining: Vec<(String, JoinHandle<()>)>,
}

impl Chains {
    /// Signal a chain to stop and keep its handle until the loop exits.
    fn retire(&mut self, session_id: &str) -> bool {
        self.draining.retain(|(_, h)| !h.is_finished());
        match self.active.remove(session_id) {
            Some(chain) => {
                chain.stop.stop();
                self.draining.push((session_id.to_string(), chain.handle));
                true
            }
            None => false,
        }
    }

    fn is_live(&self, session_id: &str) -> bool {
        self.active
            .get(session_id)
            .is_some_and(|c| !c.handle.is_finished())
            || self
                .draining
                .iter()
                .any(|(id, h)| id == session_id && !h.is_finished())
    }
}

struct Inner {
    registry: Arc<SessionRegistry>,
    availability: Arc<AvailabilityTracker>,
    dispatcher: Dispatcher,
    timer: Arc<dyn Timer>,
    session_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    history: std::sync::Mutex<VecDeque<CycleRun>>,
}

/// Per-session cycle chains.
pub struct CycleScheduler {
    inner: Arc<Inner>,
    chains: Mutex<Chains>,
}

impl CycleScheduler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        availability: Arc<AvailabilityTracker>,
        dispatcher: Dispatcher,
        timer: Arc<dyn Timer>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                availability,
                dispatcher,
                timer,
                session_locks: std::sync::Mutex::new(HashMap::new()),
                history: std::sync::Mutex::new(VecDeque::new()),
            }),
            chains: Mutex::new(Chains::default()),
        }
    }

    /// Start (or restart) the cycle chain for a session.
    ///
    /// The first cycle runs immediately. Calling this while a chain is running
    /// replaces it; there is never more than one chain per session.
    pub async fn start(&self, session_id: &str, template: &str, pacing: PacingConfig) -> Result<()> {
        pacing.validate()?;
        if template.trim().is_empty() {
            return Err(CastlineError::config("message template is empty"));
        }
        self.inner.registry.authenticated(session_id).await?;

        let mut chains = self.chains.lock().await;
        if chains.retire(session_id) {
            tracing::info!("🔁 Replacing cycle chain for session '{session_id}'");
        }

        let stop = StopHandle::new();
        let progress = Arc::new(std::sync::Mutex::new(Progress::default()));
        let handle = tokio::spawn(run_chain(
            self.inner.clone(),
            session_id.to_string(),
            template.to_string(),
            pacing,
            stop.signal(),
            progress.clone(),
        ));
        chains.active.insert(
            session_id.to_string(),
            Chain {
                stop,
                handle,
                started_at: self.inner.timer.now(),
                progress,
            },
        );
        tracing::info!("▶️ Cycle chain started for session '{session_id}'");
        Ok(())
    }

    /// Stop the chain for a session. Returns `false` if none was running.
    ///
    /// A send already in flight finishes; nothing after it is processed and no
    /// further cycle is scheduled. [`CycleScheduler::shutdown`] waits for it.
    pub async fn stop(&self, session_id: &str) -> bool {
        let stopped = self.chains.lock().await.retire(session_id);
        if stopped {
            tracing::info!("⏹️ Cycle chain stop requested for session '{session_id}'");
        }
        stopped
    }

    /// True while the session's loop is alive, including a stopped loop that
    /// is still finishing its in-flight send.
    pub async fn is_running(&self, session_id: &str) -> bool {
        self.chains.lock().await.is_live(session_id)
    }

    pub async fn running_count(&self) -> usize {
        let chains = self.chains.lock().await;
        let active = chains
            .active
            .values()
            .filter(|c| !c.handle.is_finished())
            .count();
        let draining = chains
            .draining
            .iter()
            .filter(|(id, h)| !h.is_finished() && !chains.active.contains_key(id))
            .count();
        active + draining
    }

    pub async fn status(&self, session_id: &str) -> SchedulerStatus {
        let chains = self.chains.lock().await;
        match chains.active.get(session_id) {
            Some(chain) => {
                let (cycles_completed, next_run_at) = chain
                    .progress
                    .lock()
                    .map(|p| (p.cycles_completed, p.next_run_at))
                    .unwrap_or_default();
                SchedulerStatus {
                    session_id: session_id.to_string(),
                    running: !chain.handle.is_finished(),
                    started_at: Some(chain.started_at),
                    cycles_completed,
                    next_run_at,
                }
            }
            None => SchedulerStatus {
                session_id: session_id.to_string(),
                running: chains.is_live(session_id),
                started_at: None,
                cycles_completed: 0,
                next_run_at: None,
            },
        }
    }

    /// Recent cycle runs, newest first.
    pub fn history(&self, limit: usize) -> Vec<CycleRun> {
        self.inner
            .history
            .lock()
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Dispatch once to an explicit destination list, serialised with the
    /// session's scheduled cycles. Slow-mode suppressions are not cleared.
    pub async fn run_once(
        &self,
        session_id: &str,
        destinations: &[Destination],
        template: &str,
        pacing: &PacingConfig,
    ) -> Result<Vec<DispatchOutcome>> {
        let result = {
            let lock = self.inner.session_lock(session_id);
            let _guard = lock.lock().await;
            self.dispatch_once(session_id, destinations, template, pacing)
                .await
        };
        self.inner.release_session_lock(session_id);
        result
    }

    async fn dispatch_once(
        &self,
        session_id: &str,
        destinations: &[Destination],
        template: &str,
        pacing: &PacingConfig,
    ) -> Result<Vec<DispatchOutcome>> {
        let entry = self.inner.registry.entry(session_id).await?;
        let mut run = CycleRun::start(session_id, self.inner.timer.now());
        run.destination_count = destinations.len();
        tracing::info!(
            "🚀 Manual run {} for session '{}' ({} destinations)",
            run.id,
            session_id,
            destinations.len()
        );

        let result = self
            .inner
            .dispatcher
            .dispatch(&DispatchRequest {
                cycle_id: &run.id,
                session_id,
                client: entry.client.as_ref(),
                destinations,
                text: template,
                pacing,
                stop: &StopSignal::never(),
            })
            .await;

        match &result {
            Ok(outcomes) => run.finish(outcomes, self.inner.timer.now()),
            Err(e) => run.abandon(e.to_string(), self.inner.timer.now()),
        }
        self.inner.record(run);
        result
    }

    /// Stop every chain and wait for all loops, including ones already
    /// stopped, to exit.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut chains = self.chains.lock().await;
            let sessions: Vec<String> = chains.active.keys().cloned().collect();
            for session_id in &sessions {
                chains.retire(session_id);
            }
            chains.draining.drain(..).map(|(_, h)| h).collect()
        };
        if handles.is_empty() {
            return;
        }
        tracing::info!("🛑 Shutting down {} cycle chains", handles.len());
        let results = futures::future::join_all(handles).await;
        for err in results.into_iter().filter_map(|r| r.err()) {
            tracing::warn!("Cycle chain ended abnormally: {err}");
        }
    }
}

impl Inner {
    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        match self.session_locks.lock() {
            Ok(mut locks) => locks.entry(session_id.to_string()).or_default().clone(),
            // Poisoned: fall back to an unshared lock rather than refusing to run.
            Err(_) => Arc::new(Mutex::new(())),
        }
    }

    /// Drop the session's lock entry once nobody else holds it.
    fn release_session_lock(&self, session_id: &str) {
        if let Ok(mut locks) = self.session_locks.lock() {
            if locks
                .get(session_id)
                .is_some_and(|l| Arc::strong_count(l) == 1)
            {
                locks.remove(session_id);
            }
        }
    }

    fn record(&self, run: CycleRun) {
        if let Ok(mut history) = self.history.lock() {
            if history.len() >= MAX_HISTORY {
                history.pop_front();
            }
            history.push_back(run);
        }
    }

    /// One scheduled cycle. Returns `None` if the chain was stopped before it began.
    async fn run_cycle(
        &self,
        session_id: &str,
        template: &str,
        pacing: &PacingConfig,
        stop: &StopSignal,
    ) -> Option<CycleRun> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        if stop.is_stopped() {
            return None;
        }

        let mut run = CycleRun::start(session_id, self.timer.now());
        tracing::info!("🔄 Cycle {} started for session '{}'", run.id, session_id);

        match self.dispatch_cycle(&mut run, template, pacing, stop).await {
            Ok(outcomes) => {
                run.finish(&outcomes, self.timer.now());
                tracing::info!(
                    "🏁 Cycle {} finished: {} sent, {} failed, {} processed of {}",
                    run.id,
                    run.sent,
                    run.failed,
                    outcomes.len(),
                    run.destination_count
                );
            }
            Err(e) => {
                tracing::warn!("⚠️ Cycle {} for session '{}' abandoned: {}", run.id, session_id, e);
                run.abandon(e.to_string(), self.timer.now());
            }
        }
        Some(run)
    }

    async fn dispatch_cycle(
        &self,
        run: &mut CycleRun,
        template: &str,
        pacing: &PacingConfig,
        stop: &StopSignal,
    ) -> Result<Vec<DispatchOutcome>> {
        self.availability.clear_cycle_scoped()?;
        let entry = self.registry.entry(&run.session_id).await?;
        let destinations = self
            .availability
            .eligible(Some(&entry.session.account_id))?;
        run.destination_count = destinations.len();

        self.dispatcher
            .dispatch(&DispatchRequest {
                cycle_id: &run.id,
                session_id: &run.session_id,
                client: entry.client.as_ref(),
                destinations: &destinations,
                text: template,
                pacing,
                stop,
            })
            .await
    }
}

async fn run_chain(
    inner: Arc<Inner>,
    session_id: String,
    template: String,
    pacing: PacingConfig,
    stop: StopSignal,
    progress: Arc<std::sync::Mutex<Progress>>,
) {
    let (min_delay, max_delay) = pacing.cycle_delay_bounds();
    loop {
        if stop.is_stopped() {
            break;
        }
        let Some(mut run) = inner.run_cycle(&session_id, &template, &pacing, &stop).await else {
            break;
        };
        if let Ok(mut p) = progress.lock() {
            p.cycles_completed += 1;
            p.next_run_at = None;
        }

        if stop.is_stopped() {
            inner.record(run);
            break;
        }

        let delay = jitter(min_delay, max_delay);
        run.next_delay_secs = Some(delay.as_secs());
        inner.record(run);
        let next = deadline(inner.timer.now(), delay);
        if let Ok(mut p) = progress.lock() {
            p.next_run_at = Some(next);
        }
        tracing::info!(
            "⏰ Next cycle for session '{}' in {} min (at {})",
            session_id,
            delay.as_secs() / 60,
            next
        );

        if inner.timer.sleep(delay, &stop).await == Wake::Stopped {
            break;
        }
    }
    inner.release_session_lock(&session_id);
    tracing::info!("⏹️ Cycle chain for session '{session_id}' stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedTransport;
    use crate::timer::TokioTimer;
    use castline_core::traits::{DestinationStore, OutcomeLog};
    use castline_core::types::{OutcomeStatus, Session, SuppressionReason};
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        registry: Arc<SessionRegistry>,
        availability: Arc<AvailabilityTracker>,
        transport: Arc<ScriptedTransport>,
        scheduler: CycleScheduler,
    }

    async fn harness(ids: &[&str]) -> Harness {
        let store = Arc::new(MemoryStore::new());
        for id in ids {
            store.insert(Destination::new(id, id)).unwrap();
        }
        let timer: Arc<dyn Timer> = Arc::new(TokioTimer);
        let availability = Arc::new(AvailabilityTracker::new(store.clone(), timer.clone()));
        let dispatcher = Dispatcher::new(
            availability.clone(),
            store.clone(),
            store.clone(),
            timer.clone(),
        );
        let registry = Arc::new(SessionRegistry::new());
        let transport = Arc::new(ScriptedTransport::new());
        registry
            .set(Session::new("s1", "acct-1"), transport.clone())
            .await;
        let scheduler =
            CycleScheduler::new(registry.clone(), availability.clone(), dispatcher, timer);
        Harness {
            store,
            registry,
            availability,
            transport,
            scheduler,
        }
    }

    fn fast_pacing() -> PacingConfig {
        PacingConfig {
            min_message_delay_secs: 1,
            max_message_delay_secs: 2,
            min_cycle_minutes: 1,
            max_cycle_minutes: 2,
            ..PacingConfig::default()
        }
    }

    async fn wait(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_first_cycle_immediately() {
        let h = harness(&["a", "b"]).await;
        h.scheduler.start("s1", "hello", PacingConfig::default()).await.unwrap();
        wait(60).await;

        assert_eq!(h.transport.attempts(), vec!["a", "b"]);
        let status = h.scheduler.status("s1").await;
        assert!(status.running);
        assert_eq!(status.cycles_completed, 1);
        assert!(status.next_run_at.is_some());

        let history = h.scheduler.history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sent, 2);
        let delay = history[0].next_delay_secs.unwrap();
        assert!((60 * 60..=120 * 60).contains(&delay));
        h.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_keeps_one_chain() {
        let h = harness(&["a", "b"]).await;
        h.scheduler.start("s1", "hello", PacingConfig::default()).await.unwrap();
        h.scheduler.start("s1", "hello", PacingConfig::default()).await.unwrap();
        wait(60).await;

        assert_eq!(h.scheduler.running_count().await, 1);
        assert_eq!(h.transport.attempt_count(), 2);
        h.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_wait_and_prevents_next_cycle() {
        let h = harness(&["a", "b"]).await;
        h.scheduler.start("s1", "hello", PacingConfig::default()).await.unwrap();
        wait(60).await;

        assert!(h.scheduler.stop("s1").await);
        assert!(!h.scheduler.stop("s1").await);
        wait(5 * 60 * 60).await;

        assert_eq!(h.transport.attempt_count(), 2);
        assert!(!h.scheduler.is_running("s1").await);
        assert_eq!(h.scheduler.history(10).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_cycle_finishes_in_flight_destination_only() {
        let h = harness(&["a", "b", "c"]).await;
        h.scheduler.start("s1", "hello", PacingConfig::default()).await.unwrap();
        // First send happens right away; the chain is now in the pacing sleep.
        wait(1).await;
        assert_eq!(h.transport.attempt_count(), 1);

        h.scheduler.stop("s1").await;
        wait(5 * 60 * 60).await;
        assert_eq!(h.transport.attempts(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_repeat_with_one_send_per_destination() {
        let h = harness(&["a"]).await;
        h.scheduler.start("s1", "hello", fast_pacing()).await.unwrap();
        wait(10 * 60).await;

        let status = h.scheduler.status("s1").await;
        assert!(status.cycles_completed >= 5);
        assert_eq!(h.transport.attempt_count() as u64, status.cycles_completed);
        assert_eq!(
            h.store.load("a").unwrap().unwrap().send_count,
            status.cycles_completed
        );
        h.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_start_clears_slow_mode() {
        let h = harness(&["a", "b"]).await;
        let far = Utc::now() + chrono::Duration::days(1);
        h.availability
            .suppress_temporary("a", SuppressionReason::SlowMode, far)
            .unwrap();
        h.availability
            .suppress_temporary("b", SuppressionReason::RateLimited, far)
            .unwrap();

        h.scheduler.start("s1", "hello", PacingConfig::default()).await.unwrap();
        wait(60).await;
        assert_eq!(h.transport.attempts(), vec!["a"]);
        h.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_still_schedules_next() {
        let h = harness(&["a"]).await;
        h.scheduler.start("s1", "hello", fast_pacing()).await.unwrap();
        wait(10).await;
        assert_eq!(h.transport.attempt_count(), 1);

        h.transport.set_authenticated(false);
        wait(3 * 60).await;
        let history = h.scheduler.history(1);
        assert!(history[0].error.is_some());
        assert_eq!(h.transport.attempt_count(), 1);

        h.transport.set_authenticated(true);
        wait(3 * 60).await;
        assert!(h.transport.attempt_count() >= 2);
        assert!(h.scheduler.is_running("s1").await);
        h.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_session_abandons_cycle() {
        let h = harness(&["a"]).await;
        h.scheduler.start("s1", "hello", fast_pacing()).await.unwrap();
        wait(10).await;
        h.registry.remove("s1").await;
        wait(3 * 60).await;

        let history = h.scheduler.history(1);
        assert!(history[0].error.as_deref().unwrap().contains("s1"));
        assert!(h.scheduler.is_running("s1").await);
        h.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_rejects_bad_configuration() {
        let h = harness(&["a"]).await;
        let bad = PacingConfig {
            min_message_delay_secs: 20,
            ..PacingConfig::default()
        };
        assert!(h.scheduler.start("s1", "hello", bad).await.unwrap_err().is_configuration());
        assert!(h
            .scheduler
            .start("s1", "", PacingConfig::default())
            .await
            .unwrap_err()
            .is_configuration());
        assert!(matches!(
            h.scheduler.start("nope", "hello", PacingConfig::default()).await,
            Err(CastlineError::SessionNotFound(_))
        ));

        h.transport.set_authenticated(false);
        assert!(matches!(
            h.scheduler.start("s1", "hello", PacingConfig::default()).await,
            Err(CastlineError::NotAuthenticated(_))
        ));
        assert_eq!(h.scheduler.running_count().await, 0);
        assert_eq!(h.transport.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_uses_given_destinations() {
        let h = harness(&["a", "b", "c"]).await;
        let picked = vec![
            h.store.load("c").unwrap().unwrap(),
            h.store.load("a").unwrap().unwrap(),
        ];
        let outcomes = h
            .scheduler
            .run_once("s1", &picked, "hello", &PacingConfig::default())
            .await
            .unwrap();

        assert_eq!(h.transport.attempts(), vec!["c", "a"]);
        assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Sent));
        assert_eq!(h.scheduler.history(1)[0].sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_stopped_chain_in_flight_send() {
        let h = harness(&["a", "b"]).await;
        h.transport.set_latency(Duration::from_secs(10));
        h.scheduler.start("s1", "hello", PacingConfig::default()).await.unwrap();
        wait(1).await;
        assert_eq!(h.transport.attempt_count(), 1);

        assert!(h.scheduler.stop("s1").await);
        // The send to `a` is still in flight.
        assert!(h.scheduler.is_running("s1").await);
        assert!(h.scheduler.status("s1").await.running);
        assert_eq!(h.scheduler.running_count().await, 1);

        h.scheduler.shutdown().await;
        let logged = h.store.recent(10, 0).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].destination_id, "a");
        assert_eq!(logged[0].status, OutcomeStatus::Sent);
        assert_eq!(h.transport.attempts(), vec!["a"]);
        assert_eq!(h.scheduler.history(10).len(), 1);
        assert!(!h.scheduler.is_running("s1").await);
        assert_eq!(h.scheduler.running_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_locks_released_after_chain_and_manual_run() {
        let h = harness(&["a"]).await;
        h.scheduler.start("s1", "hello", fast_pacing()).await.unwrap();
        wait(10).await;
        h.scheduler.stop("s1").await;
        h.scheduler.shutdown().await;
        assert!(h.scheduler.inner.session_locks.lock().unwrap().is_empty());

        let picked = vec![h.store.load("a").unwrap().unwrap()];
        h.scheduler
            .run_once("s1", &picked, "hello", &PacingConfig::default())
            .await
            .unwrap();
        assert!(h.scheduler.inner.session_locks.lock().unwrap().is_empty());

        // Unknown session: the error path releases too.
        assert!(h
            .scheduler
            .run_once("ghost", &picked, "hello", &PacingConfig::default())
            .await
            .is_err());
        assert!(h.scheduler.inner.session_locks.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_run_concurrently_within_their_accounts() {
        let h = harness(&[]).await;
        for (id, account) in [("a1", "acct-1"), ("a2", "acct-1"), ("b1", "acct-2")] {
            h.store
                .insert(Destination::new(id, id).with_account(account))
                .unwrap();
        }
        let other = Arc::new(ScriptedTransport::new());
        h.registry
            .set(Session::new("s2", "acct-2"), other.clone())
            .await;

        h.scheduler.start("s1", "hello", PacingConfig::default()).await.unwrap();
        h.scheduler.start("s2", "hello", PacingConfig::default()).await.unwrap();
        // s2's only send lands while s1 is still pacing between a1 and a2.
        wait(1).await;
        assert_eq!(other.attempts(), vec!["b1"]);
        assert_eq!(h.transport.attempts(), vec!["a1"]);

        wait(60).await;
        assert_eq!(h.transport.attempts(), vec!["a1", "a2"]);
        assert_eq!(other.attempts(), vec!["b1"]);
        assert_eq!(h.scheduler.running_count().await, 2);
        for id in ["a1", "a2", "b1"] {
            assert_eq!(h.store.load(id).unwrap().unwrap().send_count, 1);
        }
        h.scheduler.shutdown().await;
        assert_eq!(h.scheduler.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_chains() {
        let h = harness(&[]).await;
        h.scheduler.shutdown().await;
        assert_eq!(h.scheduler.running_count().await, 0);
    }
}
