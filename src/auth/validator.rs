use super::error::{InternalError, ValidationError};
use super::traits::{Clock, TokenSigner, TokenStore, ValidatedToken};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Checks a presented bearer token: signature, then the store record, then the clock
pub struct TokenValidator {
    signer: Arc<dyn TokenSigner>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    leeway: TimeDelta,
}

impl TokenValidator {
    pub fn new(
        signer: Arc<dyn TokenSigner>,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        clock_skew_leeway: Duration,
    ) -> Self {
        let leeway = TimeDelta::from_std(clock_skew_leeway).unwrap_or(TimeDelta::MAX);
        Self {
            signer,
            store,
            clock,
            leeway,
        }
    }

    pub async fn validate(&self, token_value: &str) -> Result<ValidatedToken, ValidationError> {
        let claims = self.signer.verify(token_value).map_err(|e| {
            tracing::debug!("Rejected token with bad signature: {}", e);
            ValidationError::BadSignature
        })?;

        let record = match self.store.get(token_value).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!("Rejected unknown token for client {}", claims.client_id);
                return Err(ValidationError::Unknown);
            }
            Err(e) => {
                tracing::error!("Token store lookup failed: {}", e);
                return Err(ValidationError::Internal(InternalError::Store(e)));
            }
        };

        if record.client_id != claims.client_id {
            tracing::warn!(
                "Stored record for a token signed for {} belongs to {}",
                claims.client_id,
                record.client_id
            );
            return Err(ValidationError::Unknown);
        }

        // expiry always comes from the record's timestamps, never from store presence
        let now = self.clock.now();
        let tolerated = now.checked_add_signed(self.leeway).unwrap_or(DateTime::<Utc>::MAX_UTC);
        if tolerated < record.issued_at {
            tracing::debug!(
                "Rejected token for client {} issued in the future",
                record.client_id
            );
            return Err(ValidationError::NotYetValid);
        }

        let remaining = record.remaining(now);
        if remaining <= TimeDelta::zero() {
            tracing::debug!("Rejected expired token for client {}", record.client_id);
            return Err(ValidationError::Expired);
        }

        let remaining_seconds = ceil_seconds(remaining).min(record.expires_in);

        Ok(ValidatedToken {
            client_id: record.client_id,
            scope: record.scope,
            remaining_seconds,
        })
    }
}

/// Whole seconds rounded up, so any positive remainder counts as a second
fn ceil_seconds(remaining: TimeDelta) -> u64 {
    let whole = u64::try_from(remaining.num_seconds()).unwrap_or(0);
    if remaining.subsec_nanos() > 0 {
        whole + 1
    } else {
        whole
    }
}
