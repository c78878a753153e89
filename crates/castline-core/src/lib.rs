//! # Castline Core
//!
//! Shared data model, collaborator traits, configuration, and errors for the
//! Castline dispatch engine.
//!
//! The engine itself lives in `castline-scheduler`; this crate only defines the
//! seams it talks through:
//! - [`TransportClient`](traits::TransportClient): sends one message, reports a
//!   classified [`TransportError`](types::TransportError)
//! - [`DestinationStore`](traits::DestinationStore): durable destinations with
//!   compare-and-swap availability transitions
//! - [`OutcomeLog`](traits::OutcomeLog): append-only dispatch outcome log

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{CastlineConfig, PacingConfig, StoreConfig};
pub use error::{CastlineError, Result};
