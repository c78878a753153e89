//! In-memory store — arena of versioned destination records plus a bounded
//! outcome ring buffer. Used for tests, dry runs, and `backend = "memory"`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use castline_core::error::{CastlineError, Result};
use castline_core::traits::{DestinationStore, OutcomeLog};
use castline_core::types::{
    Availability, AvailabilityKind, Destination, DispatchOutcome, OutcomeStatus,
};
use chrono::{DateTime, Utc};

/// Outcome entries kept before the oldest are dropped.
const DEFAULT_OUTCOME_CAPACITY: usize = 10_000;

/// Destination records live in stable slots; removal leaves a hole so the
/// order of the remaining records never changes.
#[derive(Default)]
struct Arena {
    slots: Vec<Option<Destination>>,
    index: HashMap<String, usize>,
}

impl Arena {
    fn get_mut(&mut self, id: &str) -> Option<&mut Destination> {
        let idx = *self.index.get(id)?;
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

/// Thread-safe in-memory destination store and outcome log.
pub struct MemoryStore {
    arena: Mutex<Arena>,
    outcomes: Mutex<VecDeque<DispatchOutcome>>,
    outcome_capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_outcome_capacity(DEFAULT_OUTCOME_CAPACITY)
    }

    pub fn with_outcome_capacity(capacity: usize) -> Self {
        Self {
            arena: Mutex::new(Arena::default()),
            outcomes: Mutex::new(VecDeque::new()),
            outcome_capacity: capacity.max(1),
        }
    }

    fn arena(&self) -> Result<MutexGuard<'_, Arena>> {
        self.arena
            .lock()
            .map_err(|_| CastlineError::store("destination arena lock poisoned"))
    }

    fn outcomes(&self) -> Result<MutexGuard<'_, VecDeque<DispatchOutcome>>> {
        self.outcomes
            .lock()
            .map_err(|_| CastlineError::store("outcome log lock poisoned"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationStore for MemoryStore {
    fn insert(&self, destination: Destination) -> Result<()> {
        let mut arena = self.arena()?;
        if let Some(existing) = arena.get_mut(&destination.id) {
            *existing = destination;
            return Ok(());
        }
        let idx = arena.slots.len();
        arena.index.insert(destination.id.clone(), idx);
        arena.slots.push(Some(destination));
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut arena = self.arena()?;
        match arena.index.remove(id) {
            Some(idx) => {
                arena.slots[idx] = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn load(&self, id: &str) -> Result<Option<Destination>> {
        let mut arena = self.arena()?;
        Ok(arena.get_mut(id).map(|d| d.clone()))
    }

    fn list_all(&self) -> Result<Vec<Destination>> {
        Ok(self.arena()?.iter().cloned().collect())
    }

    fn list_by_availability(&self, kind: AvailabilityKind) -> Result<Vec<Destination>> {
        Ok(self
            .arena()?
            .iter()
            .filter(|d| d.availability.kind() == kind)
            .cloned()
            .collect())
    }

    fn compare_and_swap_availability(
        &self,
        id: &str,
        expected: AvailabilityKind,
        new: Availability,
    ) -> Result<bool> {
        let mut arena = self.arena()?;
        let record = arena
            .get_mut(id)
            .ok_or_else(|| CastlineError::DestinationNotFound(id.to_string()))?;
        if record.availability.kind() != expected {
            return Ok(false);
        }
        record.availability = new;
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(true)
    }

    fn record_delivery(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut arena = self.arena()?;
        let record = arena
            .get_mut(id)
            .ok_or_else(|| CastlineError::DestinationNotFound(id.to_string()))?;
        record.send_count += 1;
        record.last_sent_at = Some(at);
        record.updated_at = at;
        Ok(())
    }
}

impl OutcomeLog for MemoryStore {
    fn append(&self, outcome: &DispatchOutcome) -> Result<()> {
        let mut log = self.outcomes()?;
        log.push_back(outcome.clone());
        while log.len() > self.outcome_capacity {
            log.pop_front();
        }
        Ok(())
    }

    fn recent(&self, limit: usize, offset: usize) -> Result<Vec<DispatchOutcome>> {
        Ok(self
            .outcomes()?
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn count_since(&self, status: OutcomeStatus, since: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .outcomes()?
            .iter()
            .filter(|o| o.status == status && o.timestamp >= since)
            .count() as u64)
    }
}
