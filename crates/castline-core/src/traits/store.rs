//! Destination store and outcome log traits.
//!
//! Both are synchronous: implementations hold their own lock for the duration
//! of a single call, which is what makes [`DestinationStore::compare_and_swap_availability`]
//! atomic across concurrent sessions.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Availability, AvailabilityKind, Destination, DispatchOutcome, OutcomeStatus};

/// Durable record of destinations and their availability.
pub trait DestinationStore: Send + Sync {
    /// Add a destination to the pool. Replaces an existing record with the same id.
    fn insert(&self, destination: Destination) -> Result<()>;

    /// Remove a destination. Returns `false` if it did not exist.
    fn remove(&self, id: &str) -> Result<bool>;

    fn load(&self, id: &str) -> Result<Option<Destination>>;

    /// All destinations, in stable insertion order.
    fn list_all(&self) -> Result<Vec<Destination>>;

    /// Destinations currently in `kind`, in stable insertion order.
    fn list_by_availability(&self, kind: AvailabilityKind) -> Result<Vec<Destination>>;

    /// Atomically replace the availability of `id` if its current state is `expected`.
    ///
    /// Returns `Ok(false)` when the current state differs (nothing is written) and
    /// `CastlineError::DestinationNotFound` when the id is unknown. A successful swap
    /// bumps the record's version.
    fn compare_and_swap_availability(
        &self,
        id: &str,
        expected: AvailabilityKind,
        new: Availability,
    ) -> Result<bool>;

    /// Increment the send counter and set the last-sent timestamp.
    fn record_delivery(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Append-only log of dispatch outcomes.
pub trait OutcomeLog: Send + Sync {
    fn append(&self, outcome: &DispatchOutcome) -> Result<()>;

    /// Most recent outcomes first.
    fn recent(&self, limit: usize, offset: usize) -> Result<Vec<DispatchOutcome>>;

    /// Number of outcomes with `status` recorded at or after `since`.
    fn count_since(&self, status: OutcomeStatus, since: DateTime<Utc>) -> Result<u64>;
}
