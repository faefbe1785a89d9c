use super::error::AuthError;
use super::traits::Client;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use subtle::ConstantTimeEq;

/// compared against when the client id is unknown, so both failure paths do the same work
const UNKNOWN_CLIENT_SECRET: &[u8] = b"credgate-unknown-client-placeholder-secret";

/// One entry of the clients file
#[derive(Debug, Deserialize)]
pub struct ClientEntry {
    pub id: String,
    pub secret: String,
}

/// Registered clients, loaded once at startup and read-only afterwards
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, Client>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins for duplicate ids
    pub fn register(&mut self, client: Client) {
        let id = client.id.clone();
        if self.clients.insert(id.clone(), client).is_some() {
            tracing::warn!("client '{}' registered twice, keeping the last entry", id);
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ClientEntry>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            if entry.id.is_empty() {
                tracing::warn!("skipping client entry with an empty id");
                continue;
            }
            if entry.secret.is_empty() {
                tracing::warn!("skipping client '{}': empty secret", entry.id);
                continue;
            }
            registry.register(Client {
                id: entry.id,
                secret: entry.secret,
            });
        }
        registry
    }

    /// Load a JSON array of `{"id": ..., "secret": ...}` objects
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read clients file {}", path.display()))?;
        let entries: Vec<ClientEntry> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse clients file {}", path.display()))?;
        Ok(Self::from_entries(entries))
    }

    pub fn lookup(&self, client_id: &str) -> Option<&Client> {
        self.clients.get(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Check a client id/secret pair. Unknown id and wrong secret are the same error.
    pub fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<&Client, AuthError> {
        let client = self.lookup(client_id);
        let expected = client.map_or(UNKNOWN_CLIENT_SECRET, |c| c.secret.as_bytes());

        // Constant-time comparison to prevent timing attacks
        let secret_matches: bool = client_secret.as_bytes().ct_eq(expected).into();

        match client {
            Some(client) if secret_matches => Ok(client),
            _ => {
                tracing::info!(
                    "Invalid client credentials attempted for client_id: {:?}",
                    client_id
                );
                Err(AuthError::InvalidClient)
            }
        }
    }
}
