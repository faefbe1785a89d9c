mod client_credentials;
mod error;
mod grant;
mod handlers;
mod middleware;
mod store;
mod sweeper;
mod token;
mod traits;
mod validator;

#[cfg(test)]
mod testing;

pub use client_credentials::ClientRegistry;
pub use error::{AuthError, SignerError, StoreError, ValidationError};
pub use grant::GrantService;
pub use handlers::{
    OAuthAppState, metadata_handler, token_get_handler, token_post_handler, validate_handler,
};
pub use middleware::{AuthMiddlewareConfig, bearer_auth_middleware};
pub use store::{FileTokenStore, MemoryTokenStore};
pub use sweeper::StoreSweeper;
pub use token::JwtTokenSigner;
pub use traits::{AccessToken, Clock, SystemClock, TokenSigner, TokenStore, ValidatedToken};
pub use validator::TokenValidator;

use std::sync::Arc;
use std::time::Duration;

/// Configuration for the authentication system
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_algorithm: String,
    pub issuer: String,
    pub token_expiration: Duration,
    pub clock_skew_leeway: Duration,
}

/// Complete OAuth service that combines issuing and validation over one store
pub struct OAuthService {
    grant: GrantService,
    validator: TokenValidator,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
}

impl OAuthService {
    pub fn new(
        config: AuthConfig,
        registry: ClientRegistry,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, SignerError> {
        Self::with_clock(config, registry, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AuthConfig,
        registry: ClientRegistry,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SignerError> {
        let signer: Arc<dyn TokenSigner> = Arc::new(JwtTokenSigner::new(
            &config.jwt_secret,
            &config.jwt_algorithm,
            &config.issuer,
        )?);

        let grant = GrantService::new(
            Arc::new(registry),
            signer.clone(),
            store.clone(),
            clock.clone(),
            config.token_expiration,
        );
        let validator = TokenValidator::new(
            signer,
            store.clone(),
            clock.clone(),
            config.clock_skew_leeway,
        );

        Ok(Self {
            grant,
            validator,
            store,
            clock,
        })
    }

    pub async fn issue_token(
        &self,
        client_id: &str,
        client_secret: &str,
        scope: &str,
    ) -> Result<AccessToken, AuthError> {
        self.grant.issue_token(client_id, client_secret, scope).await
    }

    pub async fn validate_token(&self, token: &str) -> Result<ValidatedToken, ValidationError> {
        self.validator.validate(token).await
    }

    /// Drop expired records from the store
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.store.purge_expired(self.clock.now()).await
    }

    /// Records currently held by the store, expired or not
    pub async fn stored_tokens(&self) -> usize {
        self.store.len().await
    }

    pub fn token_lifetime(&self) -> Duration {
        self.grant.token_lifetime()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use super::testing::{ManualClock, test_config, test_registry};

    fn service(lifetime_secs: u64) -> (OAuthService, Arc<MemoryTokenStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryTokenStore::new());
        let clock = Arc::new(ManualClock::new());
        let service = OAuthService::with_clock(
            test_config(lifetime_secs),
            test_registry(),
            store.clone(),
            clock.clone(),
        )
        .unwrap();
        (service, store, clock)
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let (service, _, _) = service(120);

        let token = service.issue_token("APP01", "APPSEC", "").await.unwrap();
        assert_eq!(token.expires_in, 120);

        let validated = service.validate_token(&token.token_value).await.unwrap();
        assert_eq!(
            validated,
            ValidatedToken {
                client_id: "APP01".to_string(),
                scope: String::new(),
                remaining_seconds: 120,
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_secret_issues_nothing() {
        let (service, store, _) = service(120);
        assert!(matches!(
            service.issue_token("APP01", "WRONG", "").await,
            Err(AuthError::InvalidClient)
        ));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let (service, _, _) = service(120);
        assert!(matches!(
            service.validate_token("garbage-string").await,
            Err(ValidationError::BadSignature)
        ));
    }

    #[tokio::test]
    async fn test_zero_lifetime() {
        let (service, _, _) = service(0);
        let token = service.issue_token("APP01", "APPSEC", "").await.unwrap();
        assert!(matches!(
            service.validate_token(&token.token_value).await,
            Err(ValidationError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_purge_then_validate_is_unknown() {
        let (service, store, clock) = service(120);
        let token = service.issue_token("APP01", "APPSEC", "").await.unwrap();

        clock.advance(TimeDelta::seconds(121));
        assert_eq!(service.stored_tokens().await, 1);
        assert_eq!(service.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 0);
        assert_eq!(service.stored_tokens().await, 0);
        assert!(matches!(
            service.validate_token(&token.token_value).await,
            Err(ValidationError::Unknown)
        ));
    }

    #[tokio::test]
    async fn test_tokens_survive_registry_changes() {
        // validation never looks at the registry, so a token outlives its client's entry
        let store = Arc::new(MemoryTokenStore::new());
        let clock = Arc::new(ManualClock::new());
        let issuer = OAuthService::with_clock(
            test_config(120),
            test_registry(),
            store.clone(),
            clock.clone(),
        )
        .unwrap();
        let token = issuer.issue_token("APP01", "APPSEC", "").await.unwrap();

        let restarted =
            OAuthService::with_clock(test_config(120), ClientRegistry::new(), store, clock)
                .unwrap();
        let validated = restarted.validate_token(&token.token_value).await.unwrap();
        assert_eq!(validated.client_id, "APP01");
    }

    #[test]
    fn test_bad_algorithm_fails_construction() {
        let mut config = test_config(120);
        config.jwt_algorithm = "RS256".to_string();
        assert!(matches!(
            OAuthService::new(config, test_registry(), Arc::new(MemoryTokenStore::new())),
            Err(SignerError::UnsupportedAlgorithm(_))
        ));
    }
}
