//! Fixtures shared by the auth tests

use super::AuthConfig;
use super::client_credentials::{ClientEntry, ClientRegistry};
use super::error::StoreError;
use super::traits::{Clock, TokenRecord, TokenStore};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::sync::Mutex;
use std::time::Duration;

pub const TEST_JWT_SECRET: &str = "12345678";

pub fn test_config(lifetime_secs: u64) -> AuthConfig {
    AuthConfig {
        jwt_secret: TEST_JWT_SECRET.to_string(),
        jwt_algorithm: "HS256".to_string(),
        issuer: "credgate".to_string(),
        token_expiration: Duration::from_secs(lifetime_secs),
        clock_skew_leeway: Duration::from_secs(5),
    }
}

pub fn test_registry() -> ClientRegistry {
    ClientRegistry::from_entries([
        ClientEntry {
            id: "APP01".to_string(),
            secret: "APPSEC".to_string(),
        },
        ClientEntry {
            id: "APP02".to_string(),
            secret: "OTHERSEC".to_string(),
        },
    ])
}

/// Clock that only moves when told to. Starts a quarter second past a whole second.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
            + TimeDelta::milliseconds(250);
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Store whose every operation fails, for the internal error paths
pub struct BrokenStore;

fn broken() -> StoreError {
    StoreError::Io(std::io::Error::other("disk on fire"))
}

#[async_trait]
impl TokenStore for BrokenStore {
    async fn put(&self, _token_value: &str, _record: &TokenRecord) -> Result<(), StoreError> {
        Err(broken())
    }

    async fn get(&self, _token_value: &str) -> Result<Option<TokenRecord>, StoreError> {
        Err(broken())
    }

    async fn delete(&self, _token_value: &str) -> Result<bool, StoreError> {
        Err(broken())
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        Err(broken())
    }

    async fn len(&self) -> usize {
        0
    }
}
