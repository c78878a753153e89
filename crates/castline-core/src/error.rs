//! Castline error types.

use thiserror::Error;

/// Errors surfaced by the dispatch engine and its collaborators.
///
/// Per-destination transport failures are never represented here; they are
/// recorded as outcome data. See [`crate::types::TransportError`].
#[derive(Debug, Error)]
pub enum CastlineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session '{0}' has no authenticated transport client")]
    NotAuthenticated(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Destination not found: {0}")]
    DestinationNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CastlineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Configuration-class errors are fatal to the attempted operation and are
    /// raised before any destination state is touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::NotAuthenticated(_)
                | Self::SessionNotFound(_)
                | Self::DestinationNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CastlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_class() {
        assert!(CastlineError::config("bad").is_configuration());
        assert!(CastlineError::NotAuthenticated("s1".into()).is_configuration());
        assert!(CastlineError::SessionNotFound("s1".into()).is_configuration());
        assert!(!CastlineError::store("disk full").is_configuration());
    }
}
