//! Dry-run transport: logs each message instead of sending it, optionally
//! failing a share of sends to exercise the retry path.

use async_trait::async_trait;
use castline_core::traits::TransportClient;
use castline_core::types::TransportError;
use rand::Rng;

pub struct DryRunTransport {
    fail_rate: f64,
}

impl DryRunTransport {
    pub fn new(fail_rate: f64) -> Self {
        Self {
            fail_rate: fail_rate.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl TransportClient for DryRunTransport {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    async fn send(&self, destination_id: &str, text: &str) -> Result<(), TransportError> {
        if self.fail_rate > 0.0 && rand::thread_rng().gen_bool(self.fail_rate) {
            tracing::info!("🧪 [dry-run] simulated failure for {destination_id}");
            return Err(TransportError::Other("simulated failure".into()));
        }
        let preview: String = text.chars().take(60).collect();
        tracing::info!("📨 [dry-run] → {destination_id}: {preview}");
        Ok(())
    }
}
