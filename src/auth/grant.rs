use super::client_credentials::ClientRegistry;
use super::error::{AuthError, InternalError};
use super::traits::{AccessToken, ClaimSet, Clock, TokenRecord, TokenSigner, TokenStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// The client_credentials grant: authenticate, mint, persist, hand out
pub struct GrantService {
    registry: Arc<ClientRegistry>,
    signer: Arc<dyn TokenSigner>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    token_lifetime: Duration,
}

impl GrantService {
    pub fn new(
        registry: Arc<ClientRegistry>,
        signer: Arc<dyn TokenSigner>,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        token_lifetime: Duration,
    ) -> Self {
        Self {
            registry,
            signer,
            store,
            clock,
            token_lifetime,
        }
    }

    pub fn token_lifetime(&self) -> Duration {
        self.token_lifetime
    }

    /// Issue a token for an authenticated client. Nothing is stored unless a token is returned.
    pub async fn issue_token(
        &self,
        client_id: &str,
        client_secret: &str,
        requested_scope: &str,
    ) -> Result<AccessToken, AuthError> {
        let client = self.registry.authenticate(client_id, client_secret)?;

        // whole seconds, so the record and the signed iat agree exactly
        let now = self.clock.now();
        let issued_at_secs = now.timestamp();
        let issued_at = DateTime::<Utc>::from_timestamp(issued_at_secs, 0).unwrap_or(now);
        let expires_in = self.token_lifetime.as_secs();

        let claims = ClaimSet::new(&client.id, requested_scope, issued_at_secs, expires_in);
        let token_value = self.signer.mint(&claims).map_err(|e| {
            tracing::error!("Failed to sign token for client {}: {}", client.id, e);
            AuthError::Internal(InternalError::Signer(e))
        })?;

        let token = AccessToken {
            token_value,
            client_id: client.id.clone(),
            scope: requested_scope.to_string(),
            issued_at,
            expires_in,
        };
        let record: TokenRecord = token.record();

        // a token that didn't make it into the store is never handed out
        if let Err(e) = self.store.put(&token.token_value, &record).await {
            tracing::error!("Failed to persist token for client {}: {}", client.id, e);
            return Err(AuthError::Internal(InternalError::Store(e)));
        }

        tracing::info!(
            "Issued access token for client {} (scope: {:?}, expires in {}s)",
            token.client_id,
            token.scope,
            token.expires_in
        );
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryTokenStore;
    use crate::auth::testing::{BrokenStore, ManualClock, TEST_JWT_SECRET, test_registry};
    use crate::auth::token::JwtTokenSigner;

    fn signer() -> Arc<JwtTokenSigner> {
        Arc::new(JwtTokenSigner::new(TEST_JWT_SECRET, "HS256", "credgate").unwrap())
    }

    fn service(store: Arc<dyn TokenStore>, clock: Arc<ManualClock>) -> GrantService {
        GrantService::new(
            Arc::new(test_registry()),
            signer(),
            store,
            clock,
            Duration::from_secs(120),
        )
    }

    #[tokio::test]
    async fn test_issue_persists_exactly_one_record() {
        let store = Arc::new(MemoryTokenStore::new());
        let clock = Arc::new(ManualClock::new());
        let grant = service(store.clone(), clock.clone());

        let token = grant.issue_token("APP01", "APPSEC", "").await.unwrap();

        assert_eq!(token.client_id, "APP01");
        assert_eq!(token.expires_in, 120);
        assert_eq!(token.issued_at.timestamp(), clock.now().timestamp());
        assert_eq!(token.issued_at.timestamp_subsec_nanos(), 0);
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.get(&token.token_value).await.unwrap(),
            Some(token.record())
        );
    }

    #[tokio::test]
    async fn test_minted_claims_match_record() {
        let store = Arc::new(MemoryTokenStore::new());
        let grant = service(store.clone(), Arc::new(ManualClock::new()));

        let token = grant.issue_token("APP02", "OTHERSEC", "reports:read").await.unwrap();
        let claims = signer().verify(&token.token_value).unwrap();

        assert_eq!(claims.client_id, "APP02");
        assert_eq!(claims.scope, "reports:read");
        assert_eq!(claims.issued_at, token.issued_at.timestamp());
        assert_eq!(claims.expires_in, 120);
    }

    #[tokio::test]
    async fn test_rejections_store_nothing() {
        let store = Arc::new(MemoryTokenStore::new());
        let grant = service(store.clone(), Arc::new(ManualClock::new()));

        for (id, secret) in [("APP01", "WRONG"), ("NOPE", "APPSEC"), ("APP01", "")] {
            assert!(matches!(
                grant.issue_token(id, secret, "").await,
                Err(AuthError::InvalidClient)
            ));
        }
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_returns_no_token() {
        let grant = service(Arc::new(BrokenStore), Arc::new(ManualClock::new()));
        assert!(matches!(
            grant.issue_token("APP01", "APPSEC", "").await,
            Err(AuthError::Internal(InternalError::Store(_)))
        ));
    }

    #[tokio::test]
    async fn test_same_second_issues_are_distinct() {
        let store = Arc::new(MemoryTokenStore::new());
        let grant = service(store.clone(), Arc::new(ManualClock::new()));

        let a = grant.issue_token("APP01", "APPSEC", "").await.unwrap();
        let b = grant.issue_token("APP01", "APPSEC", "").await.unwrap();

        assert_eq!(a.issued_at, b.issued_at);
        assert_ne!(a.token_value, b.token_value);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_grants_are_independent() {
        let store = Arc::new(MemoryTokenStore::new());
        let grant = Arc::new(service(store.clone(), Arc::new(ManualClock::new())));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let grant = grant.clone();
                tokio::spawn(async move { grant.issue_token("APP01", "APPSEC", "").await })
            })
            .collect();

        let mut values = std::collections::HashSet::new();
        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            values.insert(token.token_value);
        }
        assert_eq!(values.len(), 50);
        assert_eq!(store.len().await, 50);
    }
}
