use super::error::StoreError;
use super::traits::{TokenRecord, TokenStore};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// in-memory store, gone on restart
#[derive(Default)]
pub struct MemoryTokenStore {
    records: RwLock<HashMap<String, TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, token_value: &str, record: &TokenRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(token_value.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, token_value: &str) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.records.read().await.get(token_value).cloned())
    }

    async fn delete(&self, token_value: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(token_value).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok(before - records.len())
    }

    async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

/// One line of the append-only log
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Put { key: String, record: TokenRecord },
    Delete { key: String },
}

/// Append-only JSON lines file, replayed into memory on open.
///
/// Records are keyed by the SHA-256 of the token so bearer tokens never hit the disk.
/// Every write is synced before it returns; `purge_expired` rewrites the file with only
/// the live records.
pub struct FileTokenStore {
    path: PathBuf,
    index: RwLock<HashMap<String, TokenRecord>>,
    // held for the whole write so the log and the index agree on ordering
    log: Mutex<LogFile>,
}

/// The open log plus how far into it the last fully synced entry reaches
struct LogFile {
    file: File,
    committed_len: u64,
}

impl LogFile {
    async fn open(path: &Path, committed_len: u64) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let mut log = Self {
            file,
            committed_len,
        };
        log.discard_partial_tail().await?;
        Ok(log)
    }

    async fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        self.discard_partial_tail().await?;
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        self.committed_len += line.len() as u64;
        Ok(())
    }

    /// Anything past `committed_len` is a write that never completed. Cut it so the next
    /// entry doesn't get glued onto the fragment and lost on replay.
    async fn discard_partial_tail(&mut self) -> Result<(), StoreError> {
        let len = self.file.metadata().await?.len();
        if len > self.committed_len {
            tracing::warn!(
                "discarding {} bytes of a partially written token store entry",
                len - self.committed_len
            );
            self.file.set_len(self.committed_len).await?;
            self.file.sync_data().await?;
        }
        Ok(())
    }
}

impl FileTokenStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let (index, committed_len) = match tokio::fs::read(&path).await {
            Ok(contents) => {
                // only newline-terminated entries count, a trailing fragment is a torn write
                let complete = contents
                    .iter()
                    .rposition(|&b| b == b'\n')
                    .map_or(0, |i| i + 1);
                let index = replay(&String::from_utf8_lossy(&contents[..complete]));
                (index, complete as u64)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => (HashMap::new(), 0),
            Err(e) => return Err(e.into()),
        };

        let log = LogFile::open(&path, committed_len).await?;

        tracing::info!(
            "Opened token store at {} with {} records",
            path.display(),
            index.len()
        );

        Ok(Self {
            path,
            index: RwLock::new(index),
            log: Mutex::new(log),
        })
    }

    /// Writes the live records to a fresh log and renames it over the old one. The new
    /// handle is opened before the rename, so a failure leaves the old log in use.
    async fn compact(&self, live: &HashMap<String, TokenRecord>) -> Result<LogFile, StoreError> {
        let tmp_path = self.path.with_extension("compact");
        let mut buf = Vec::new();
        for (key, record) in live {
            let entry = LogEntry::Put {
                key: key.clone(),
                record: record.clone(),
            };
            serde_json::to_writer(&mut buf, &entry)?;
            buf.push(b'\n');
        }

        match tokio::fs::remove_file(&tmp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut tmp = LogFile::open(&tmp_path, 0).await?;
        tmp.file.write_all(&buf).await?;
        tmp.file.flush().await?;
        tmp.file.sync_all().await?;
        tmp.committed_len = buf.len() as u64;

        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(tmp)
    }
}

fn replay(contents: &str) -> HashMap<String, TokenRecord> {
    let mut index = HashMap::new();
    for (n, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(LogEntry::Put { key, record }) => {
                index.insert(key, record);
            }
            Ok(LogEntry::Delete { key }) => {
                index.remove(&key);
            }
            Err(e) => {
                tracing::warn!("skipping unreadable token store line {}: {}", n + 1, e);
            }
        }
    }
    index
}

fn storage_key(token_value: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token_value.as_bytes()))
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn put(&self, token_value: &str, record: &TokenRecord) -> Result<(), StoreError> {
        let key = storage_key(token_value);
        let mut log = self.log.lock().await;
        log.append(&LogEntry::Put {
            key: key.clone(),
            record: record.clone(),
        })
        .await?;
        self.index.write().await.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, token_value: &str) -> Result<Option<TokenRecord>, StoreError> {
        let key = storage_key(token_value);
        Ok(self.index.read().await.get(&key).cloned())
    }

    async fn delete(&self, token_value: &str) -> Result<bool, StoreError> {
        let key = storage_key(token_value);
        let mut log = self.log.lock().await;
        if !self.index.read().await.contains_key(&key) {
            return Ok(false);
        }
        log.append(&LogEntry::Delete { key: key.clone() }).await?;
        self.index.write().await.remove(&key);
        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut log = self.log.lock().await;

        let live: HashMap<String, TokenRecord> = {
            let index = self.index.read().await;
            index
                .iter()
                .filter(|(_, record)| !record.is_expired(now))
                .map(|(key, record)| (key.clone(), record.clone()))
                .collect()
        };
        let purged = self.index.read().await.len() - live.len();
        if purged == 0 {
            return Ok(0);
        }

        // the index only shrinks once the compacted file is in place
        *log = self.compact(&live).await?;
        *self.index.write().await = live;

        tracing::debug!("purged {} expired token records", purged);
        Ok(purged)
    }

    async fn len(&self) -> usize {
        self.index.read().await.len()
    }
}
