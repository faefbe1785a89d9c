use super::OAuthService;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically drops expired records from the token store
pub struct StoreSweeper {
    service: Arc<OAuthService>,
    interval: Duration,
}

impl StoreSweeper {
    pub fn new(service: Arc<OAuthService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run until cancelled. A failed sweep is logged and retried next interval.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Starting token store sweeper every {:?}", self.interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => {
                    tracing::info!("Token store sweeper stopped");
                    break;
                }
            }

            match self.service.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(
                    "Purged {} expired tokens, {} still on record",
                    purged,
                    self.service.stored_tokens().await
                ),
                Err(e) => tracing::error!("Token store sweep failed: {}", e),
            }
        }
    }
}
