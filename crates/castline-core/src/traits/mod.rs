//! Collaborator traits the dispatch engine is built against.

pub mod store;
pub mod transport;

pub use store::{DestinationStore, OutcomeLog};
pub use transport::TransportClient;
