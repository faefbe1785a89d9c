use super::error::{SignerError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version stamped into every minted claim set. Bump when the claim layout changes.
pub const CLAIMS_VERSION: u8 = 1;

/// A registered machine client
#[derive(Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub secret: String,
}

// secrets stay out of logs, even debug ones
impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Claims carried inside a signed access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSet {
    pub version: u8,
    pub client_id: String,
    pub scope: String,
    /// unix seconds
    pub issued_at: i64,
    /// seconds
    pub expires_in: u64,
    /// unique per minted token
    pub token_id: String,
}

impl ClaimSet {
    pub fn new(client_id: &str, scope: &str, issued_at: i64, expires_in: u64) -> Self {
        Self {
            version: CLAIMS_VERSION,
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            issued_at,
            expires_in,
            token_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// What the token store keeps for every issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub client_id: String,
    #[serde(default)]
    pub scope: String,
    pub issued_at: DateTime<Utc>,
    /// seconds
    pub expires_in: u64,
}

impl TokenRecord {
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| self.issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Time left until expiry, negative once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        self.expires_at().signed_duration_since(now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now) <= TimeDelta::zero()
    }
}

/// A freshly issued bearer token
#[derive(Clone)]
pub struct AccessToken {
    pub token_value: String,
    pub client_id: String,
    pub scope: String,
    pub issued_at: DateTime<Utc>,
    /// seconds
    pub expires_in: u64,
}

impl AccessToken {
    pub fn record(&self) -> TokenRecord {
        TokenRecord {
            client_id: self.client_id.clone(),
            scope: self.scope.clone(),
            issued_at: self.issued_at,
            expires_in: self.expires_in,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_value", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Outcome of a successful bearer token validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedToken {
    pub client_id: String,
    pub scope: String,
    pub remaining_seconds: u64,
}

/// Turns claims into an opaque token and back. Purely cryptographic, never looks at the clock.
pub trait TokenSigner: Send + Sync {
    fn mint(&self, claims: &ClaimSet) -> Result<String, SignerError>;
    fn verify(&self, token_value: &str) -> Result<ClaimSet, SignerError>;
}

/// Bookkeeping for issued tokens, keyed by token value
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or overwrite. Durable once this returns.
    async fn put(&self, token_value: &str, record: &TokenRecord) -> Result<(), StoreError>;

    async fn get(&self, token_value: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Returns whether a record was removed
    #[allow(dead_code)] // revocation by deletion, no endpoint exposes it yet
    async fn delete(&self, token_value: &str) -> Result<bool, StoreError>;

    /// Drop every record expired at `now`, returning how many went
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn len(&self) -> usize;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64, // seconds
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

impl From<&AccessToken> for TokenResponse {
    fn from(token: &AccessToken) -> Self {
        Self {
            access_token: token.token_value.clone(),
            token_type: "bearer".to_string(),
            expires_in: token.expires_in,
            scope: token.scope.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub expires_in: u64, // remaining seconds
    pub client_id: String,
    pub scope: String,
}

impl From<ValidatedToken> for ValidationResponse {
    fn from(token: ValidatedToken) -> Self {
        Self {
            expires_in: token.remaining_seconds,
            client_id: token.client_id,
            scope: token.scope,
        }
    }
}
