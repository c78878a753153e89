//! # Castline Scheduler
//!
//! Bulk dispatch engine: availability tracking, paced send-with-retry, and
//! jittered per-session cycle chains.
//!
//! ## Layout
//! - [`availability`]: Active / SuppressedTemporary / SuppressedPermanent transitions
//! - [`dispatch`]: one dispatch round over an ordered destination list
//! - [`engine`]: per-session cycle chains with cancellable waits
//! - [`sessions`]: session id → transport client registry
//! - [`store`] / [`persistence`]: in-memory and SQLite backends
//! - [`service`]: the facade used by applications and the CLI

pub mod availability;
pub mod dispatch;
pub mod engine;
pub mod persistence;
pub mod service;
pub mod sessions;
pub mod store;
pub mod timer;

#[cfg(test)]
mod testing;

pub use availability::{AvailabilityTracker, Eligibility};
pub use dispatch::{DispatchRequest, Dispatcher};
pub use engine::{CycleScheduler, SchedulerStatus};
pub use persistence::SqliteStore;
pub use service::{DashboardStats, DispatchService};
pub use sessions::{SessionEntry, SessionRegistry};
pub use store::MemoryStore;
pub use timer::{StopHandle, StopSignal, Timer, TokioTimer, Wake};
