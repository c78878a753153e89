//! Dispatch engine — sends one message to an ordered list of destinations with
//! randomized pacing, bounded retries, and per-destination failure isolation.
//!
//! Per destination:
//! 1. re-check eligibility (a suppression from earlier in the cycle wins)
//! 2. send through the transport client
//! 3. classify failures:
//!    - rate limit → temporary suppression for the signalled wait, no retry
//!    - slow mode  → cycle-scoped temporary suppression, no retry
//!    - permanent  → permanent suppression, no retry
//!    - other      → exponential backoff and retry until attempts run out
//! 4. persist the outcome before moving on
//!
//! Between one destination and the next (never after the last), sleep a random
//! delay in `[min_message_delay, max_message_delay]`. A stop request interrupts any sleep
//! and prevents further destinations from being processed.

use std::sync::Arc;
use std::time::Duration;

use castline_core::config::PacingConfig;
use castline_core::error::{CastlineError, Result};
use castline_core::traits::{DestinationStore, OutcomeLog, TransportClient};
use castline_core::types::{
    Destination, DispatchOutcome, ErrorClass, OutcomeStatus, TransportError,
};
use chrono::{DateTime, Utc};

use crate::availability::{AvailabilityTracker, Eligibility};
use crate::timer::{StopSignal, Timer, Wake, deadline, jitter};

/// Everything one dispatch round needs.
pub struct DispatchRequest<'a> {
    pub cycle_id: &'a str,
    pub session_id: &'a str,
    pub client: &'a dyn TransportClient,
    /// Processed in this order.
    pub destinations: &'a [Destination],
    pub text: &'a str,
    pub pacing: &'a PacingConfig,
    pub stop: &'a StopSignal,
}

/// The dispatch engine.
pub struct Dispatcher {
    availability: Arc<AvailabilityTracker>,
    store: Arc<dyn DestinationStore>,
    outcomes: Arc<dyn OutcomeLog>,
    timer: Arc<dyn Timer>,
}

impl Dispatcher {
    pub fn new(
        availability: Arc<AvailabilityTracker>,
        store: Arc<dyn DestinationStore>,
        outcomes: Arc<dyn OutcomeLog>,
        timer: Arc<dyn Timer>,
    ) -> Self {
        Self {
            availability,
            store,
            outcomes,
            timer,
        }
    }

    /// Send to every destination in order and return one outcome per processed
    /// destination.
    ///
    /// Only configuration problems (unauthenticated client, empty message) and
    /// store failures are returned as errors; transport failures become outcomes.
    pub async fn dispatch(&self, req: &DispatchRequest<'_>) -> Result<Vec<DispatchOutcome>> {
        if req.text.trim().is_empty() {
            return Err(CastlineError::config("message template is empty"));
        }
        if !req.client.is_authenticated() {
            return Err(CastlineError::NotAuthenticated(req.session_id.to_string()));
        }

        let total = req.destinations.len();
        let (min_delay, max_delay) = req.pacing.message_delay_bounds();
        let mut outcomes = Vec::with_capacity(total);

        tracing::info!(
            "📤 Dispatch {} started: {} destinations via {}",
            req.cycle_id,
            total,
            req.client.name()
        );

        for (idx, dest) in req.destinations.iter().enumerate() {
            if req.stop.is_stopped() {
                tracing::info!(
                    "⏹️ Dispatch {} stopped after {}/{} destinations",
                    req.cycle_id,
                    idx,
                    total
                );
                break;
            }

            let outcome = self.deliver(req, dest).await?;
            self.outcomes.append(&outcome)?;
            log_outcome(dest, &outcome);
            outcomes.push(outcome);

            if idx + 1 < total {
                let delay = jitter(min_delay, max_delay);
                tracing::debug!("⏳ Pacing {}ms before next destination", delay.as_millis());
                if self.timer.sleep(delay, req.stop).await == Wake::Stopped {
                    tracing::info!(
                        "⏹️ Dispatch {} stopped after {}/{} destinations",
                        req.cycle_id,
                        idx + 1,
                        total
                    );
                    break;
                }
            }
        }

        Ok(outcomes)
    }

    /// Run the retry loop for a single destination.
    async fn deliver(
        &self,
        req: &DispatchRequest<'_>,
        dest: &Destination,
    ) -> Result<DispatchOutcome> {
        let max_attempts = req.pacing.max_retry_attempts.max(1);
        let mut attempts = 0;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.availability.check(&dest.id)? {
                Eligibility::Eligible(_) => {}
                Eligibility::Suppressed(availability) => {
                    let mut outcome = self
                        .outcome(req, dest, OutcomeStatus::SkippedSuppressed)
                        .with_attempts(attempts);
                    outcome.error_detail = availability.reason().map(|r| format!("suppressed: {r}"));
                    return Ok(outcome);
                }
                Eligibility::Missing => {
                    let mut outcome = self
                        .outcome(req, dest, OutcomeStatus::SkippedSuppressed)
                        .with_attempts(attempts);
                    outcome.error_detail = Some("removed from pool".into());
                    return Ok(outcome);
                }
            }

            attempts = attempt;
            let err = match req.client.send(&dest.id, req.text).await {
                Ok(()) => {
                    self.store.record_delivery(&dest.id, self.timer.now())?;
                    return Ok(self
                        .outcome(req, dest, OutcomeStatus::Sent)
                        .with_attempts(attempts));
                }
                Err(err) => err,
            };

            let class = err.class();
            match class {
                ErrorClass::RateLimit | ErrorClass::SlowMode => {
                    if let Some(reason) = err.suppression_reason() {
                        let until = self.suppression_until(&err, req.pacing);
                        self.availability.suppress_temporary(&dest.id, reason, until)?;
                    }
                    return Ok(self
                        .outcome(req, dest, OutcomeStatus::FailedRetriesExhausted)
                        .with_attempts(attempts)
                        .with_error(class, err.to_string()));
                }
                ErrorClass::Permanent => {
                    if let Some(reason) = err.suppression_reason() {
                        self.availability.suppress_permanent(&dest.id, reason)?;
                    }
                    return Ok(self
                        .outcome(req, dest, OutcomeStatus::FailedTerminal)
                        .with_attempts(attempts)
                        .with_error(class, err.to_string()));
                }
                ErrorClass::Transient => {
                    last_error = err.to_string();
                    if attempt == max_attempts {
                        break;
                    }
                    let backoff = req.pacing.backoff(attempt);
                    tracing::warn!(
                        "🔁 Send to '{}' failed (attempt {}/{}): {} — retrying in {}s",
                        dest.id,
                        attempt,
                        max_attempts,
                        err,
                        backoff.as_secs()
                    );
                    if self.timer.sleep(backoff, req.stop).await == Wake::Stopped {
                        last_error = format!("stopped during backoff: {last_error}");
                        break;
                    }
                }
            }
        }

        Ok(self
            .outcome(req, dest, OutcomeStatus::FailedRetriesExhausted)
            .with_attempts(attempts)
            .with_error(ErrorClass::Transient, last_error))
    }

    fn suppression_until(&self, err: &TransportError, pacing: &PacingConfig) -> DateTime<Utc> {
        let secs = match err {
            TransportError::RateLimited { wait_secs } => *wait_secs,
            _ => pacing.slow_mode_suppression_secs,
        };
        deadline(self.timer.now(), Duration::from_secs(secs))
    }

    fn outcome(
        &self,
        req: &DispatchRequest<'_>,
        dest: &Destination,
        status: OutcomeStatus,
    ) -> DispatchOutcome {
        DispatchOutcome::new(
            req.cycle_id,
            req.session_id,
            &dest.id,
            status,
            self.timer.now(),
        )
    }
}

fn log_outcome(dest: &Destination, outcome: &DispatchOutcome) {
    match outcome.status {
        OutcomeStatus::Sent => {
            tracing::info!("✅ Sent to '{}' ({})", dest.name, dest.id)
        }
        OutcomeStatus::SkippedSuppressed => tracing::info!(
            "⏭️ Skipped '{}': {}",
            dest.id,
            outcome.error_detail.as_deref().unwrap_or("suppressed")
        ),
        OutcomeStatus::FailedRetriesExhausted | OutcomeStatus::FailedTerminal => tracing::warn!(
            "⚠️ Send to '{}' failed [{}]: {}",
            dest.id,
            outcome.status,
            outcome.error_detail.as_deref().unwrap_or("unknown")
        ),
    }
}
