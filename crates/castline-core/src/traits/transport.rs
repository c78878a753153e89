//! Transport client trait — the external library that actually delivers messages.

use async_trait::async_trait;

use crate::types::TransportError;

/// An authenticated connection able to send one message to one destination.
///
/// Implementations map their library-specific failures onto the closed
/// [`TransportError`] set; anything they cannot classify becomes
/// [`TransportError::Other`] and is retried by the dispatch engine.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Short name for logs (e.g. "telegram").
    fn name(&self) -> &str;

    /// Whether the client is connected and authenticated.
    fn is_authenticated(&self) -> bool;

    /// Send `text` to the destination with the given remote id.
    async fn send(&self, destination_id: &str, text: &str) -> Result<(), TransportError>;
}
