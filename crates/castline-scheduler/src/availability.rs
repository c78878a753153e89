//! Availability state machine — decides whether a destination may be sent to
//! right now and applies suppression / reactivation transitions.
//!
//! ```text
//!            rate-limit / slow-mode
//!   Active ─────────────────────────▶ SuppressedTemporary
//!     │  ▲                               │
//!     │  └──── expiry passed (lazy) ─────┘
//!     │  ▲     slow-mode: every cycle start
//!     │  │
//!     │  └──── explicit reactivation ────┐
//!     ▼                                  │
//!   SuppressedPermanent ◀── banned / forbidden / invalid (from Active or Temporary)
//! ```
//!
//! Every transition is a compare-and-swap on the store, so a permanent
//! suppression can never be overwritten by a late temporary one.

use std::sync::Arc;

use castline_core::error::{CastlineError, Result};
use castline_core::traits::DestinationStore;
use castline_core::types::{
    Availability, AvailabilityKind, AvailabilitySummary, Destination, SuppressionReason,
};
use chrono::{DateTime, Utc};

use crate::timer::Timer;

/// CAS retries before giving up on a contended transition.
const MAX_CAS_ATTEMPTS: usize = 4;

/// Result of an eligibility check for a single destination.
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    /// May be sent to now. Carries the (possibly just reactivated) record.
    Eligible(Destination),
    /// Currently suppressed.
    Suppressed(Availability),
    /// No longer in the store.
    Missing,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible(_))
    }
}

/// Availability tracker over a shared destination store.
pub struct AvailabilityTracker {
    store: Arc<dyn DestinationStore>,
    timer: Arc<dyn Timer>,
}

impl AvailabilityTracker {
    pub fn new(store: Arc<dyn DestinationStore>, timer: Arc<dyn Timer>) -> Self {
        Self { store, timer }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.timer.now()
    }

    /// Check one destination, reactivating an expired temporary suppression.
    pub fn check(&self, id: &str) -> Result<Eligibility> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(dest) = self.store.load(id)? else {
                return Ok(Eligibility::Missing);
            };
            match self.evaluate(dest)? {
                Some(result) => return Ok(result),
                None => continue,
            }
        }
        Err(CastlineError::store(format!(
            "availability of '{id}' kept changing during eligibility check"
        )))
    }

    /// All eligible destinations in store order, optionally limited to one account.
    ///
    /// Expired temporary suppressions are moved back to Active as a side effect.
    pub fn eligible(&self, account_id: Option<&str>) -> Result<Vec<Destination>> {
        let mut out = Vec::new();
        for dest in self.store.list_all()? {
            if !dest.in_scope(account_id) {
                continue;
            }
            let result = match self.evaluate(dest.clone())? {
                Some(result) => result,
                // Lost a race with another writer; re-read this one.
                None => self.check(&dest.id)?,
            };
            if let Eligibility::Eligible(d) = result {
                out.push(d);
            }
        }
        Ok(out)
    }

    /// `None` means the CAS lost a race and the caller should reload.
    fn evaluate(&self, dest: Destination) -> Result<Option<Eligibility>> {
        match &dest.availability {
            Availability::Active => Ok(Some(Eligibility::Eligible(dest))),
            Availability::SuppressedPermanent { .. } => {
                Ok(Some(Eligibility::Suppressed(dest.availability.clone())))
            }
            Availability::SuppressedTemporary { until, reason } => {
                if self.now() < *until {
                    return Ok(Some(Eligibility::Suppressed(dest.availability.clone())));
                }
                let swapped = self.store.compare_and_swap_availability(
                    &dest.id,
                    AvailabilityKind::SuppressedTemporary,
                    Availability::Active,
                )?;
                if !swapped {
                    return Ok(None);
                }
                tracing::info!("🔓 Destination '{}' reactivated ({} expired)", dest.id, reason);
                let mut dest = dest;
                dest.availability = Availability::Active;
                dest.version += 1;
                Ok(Some(Eligibility::Eligible(dest)))
            }
        }
    }

    /// Active → SuppressedTemporary. Returns `false` if the destination was not
    /// Active (already suppressed, possibly permanently); nothing is written then.
    pub fn suppress_temporary(
        &self,
        id: &str,
        reason: SuppressionReason,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        let swapped = self.store.compare_and_swap_availability(
            id,
            AvailabilityKind::Active,
            Availability::SuppressedTemporary { reason, until },
        )?;
        if swapped {
            tracing::warn!("⏸️ Destination '{id}' suppressed until {until} ({reason})");
        } else {
            tracing::debug!("Temporary suppression of '{id}' skipped: not active");
        }
        Ok(swapped)
    }

    /// Any state → SuppressedPermanent. Returns `false` if already permanent.
    pub fn suppress_permanent(&self, id: &str, reason: SuppressionReason) -> Result<bool> {
        self.transition(id, |current| {
            (current.kind() != AvailabilityKind::SuppressedPermanent)
                .then_some(Availability::SuppressedPermanent { reason })
        })
        .inspect(|&swapped| {
            if swapped {
                tracing::warn!("⛔ Destination '{id}' permanently suppressed ({reason})");
            }
        })
    }

    /// Explicit external reactivation; the only way out of SuppressedPermanent.
    pub fn reactivate(&self, id: &str) -> Result<bool> {
        self.transition(id, |current| {
            (current.kind() != AvailabilityKind::Active).then_some(Availability::Active)
        })
        .inspect(|&swapped| {
            if swapped {
                tracing::info!("🔓 Destination '{id}' reactivated manually");
            }
        })
    }

    /// Clear every cycle-scoped (slow-mode) suppression regardless of expiry.
    pub fn clear_cycle_scoped(&self) -> Result<usize> {
        let mut cleared = 0;
        for dest in self
            .store
            .list_by_availability(AvailabilityKind::SuppressedTemporary)?
        {
            let cycle_scoped = dest
                .availability
                .reason()
                .is_some_and(|r| r.is_cycle_scoped());
            if cycle_scoped
                && self.store.compare_and_swap_availability(
                    &dest.id,
                    AvailabilityKind::SuppressedTemporary,
                    Availability::Active,
                )?
            {
                cleared += 1;
            }
        }
        if cleared > 0 {
            tracing::info!("🧹 Cleared {cleared} slow-mode suppressions");
        }
        Ok(cleared)
    }

    /// Counts per stored state (no lazy reactivation).
    pub fn summary(&self) -> Result<AvailabilitySummary> {
        Ok(AvailabilitySummary {
            active: self.store.list_by_availability(AvailabilityKind::Active)?.len(),
            suppressed_temporary: self
                .store
                .list_by_availability(AvailabilityKind::SuppressedTemporary)?
                .len(),
            suppressed_permanent: self
                .store
                .list_by_availability(AvailabilityKind::SuppressedPermanent)?
                .len(),
        })
    }

    /// Load → decide → CAS, retried while other writers interfere.
    fn transition<F>(&self, id: &str, next: F) -> Result<bool>
    where
        F: Fn(&Availability) -> Option<Availability>,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let dest = self
                .store
                .load(id)?
                .ok_or_else(|| CastlineError::DestinationNotFound(id.to_string()))?;
            let Some(new) = next(&dest.availability) else {
                return Ok(false);
            };
            if self
                .store
                .compare_and_swap_availability(id, dest.availability.kind(), new)?
            {
                return Ok(true);
            }
        }
        Err(CastlineError::store(format!(
            "availability of '{id}' kept changing during transition"
        )))
    }
}
