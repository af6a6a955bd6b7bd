//! Audit trail of files seen by the gateway
//!
//! Records are keyed by `(hash, hostname)` and written once. Saving the same
//! pair again is a no-op, so pipelines can re-run a file safely.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub hash: String,
    pub hostname: String,
    pub direction: Direction,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit: missing file hash")]
    MissingHash,

    #[error("audit: storage error: {0}")]
    Storage(String),
}

/// Persistence boundary for audit records. Must tolerate concurrent writers.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Record that `hash` was seen from `hostname`. Idempotent per pair.
    async fn save_file(
        &self,
        hash: &str,
        hostname: &str,
        direction: Direction,
    ) -> Result<(), AuditError>;
}

/// In-process audit storage
#[derive(Default)]
pub struct MemoryStorage {
    records: DashMap<(String, String), AuditRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &str, hostname: &str) -> Option<AuditRecord> {
        self.records
            .get(&(hash.to_string(), hostname.to_string()))
            .map(|r| r.value().clone())
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        let mut out: Vec<AuditRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        out.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then_with(|| a.hash.cmp(&b.hash)));
        out
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AuditStorage for MemoryStorage {
    async fn save_file(
        &self,
        hash: &str,
        hostname: &str,
        direction: Direction,
    ) -> Result<(), AuditError> {
        if hash.is_empty() {
            return Err(AuditError::MissingHash);
        }
        self.records
            .entry((hash.to_string(), hostname.to_string()))
            .or_insert_with(|| AuditRecord {
                hash: hash.to_string(),
                hostname: hostname.to_string(),
                direction,
                recorded_at: Utc::now(),
            });
        Ok(())
    }
}

/// Saves incoming file hashes for one remote host
#[derive(Clone)]
pub struct AuditSaver {
    storage: Arc<dyn AuditStorage>,
    hostname: String,
}

impl AuditSaver {
    pub fn new(storage: Arc<dyn AuditStorage>, hostname: impl Into<String>) -> Self {
        Self {
            storage,
            hostname: hostname.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub async fn save(&self, hash: &str) -> Result<(), AuditError> {
        debug!("audit: recording {} from {}", hash, self.hostname);
        self.storage
            .save_file(hash, &self.hostname, Direction::Incoming)
            .await
    }
}

impl fmt::Debug for AuditSaver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditSaver")
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_is_write_once() {
        let storage = MemoryStorage::new();
        storage
            .save_file("abc", "ftp.foo.com", Direction::Incoming)
            .await
            .unwrap();
        let first = storage.get("abc", "ftp.foo.com").unwrap();

        storage
            .save_file("abc", "ftp.foo.com", Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get("abc", "ftp.foo.com").unwrap(), first);
        assert_eq!(first.direction, Direction::Incoming);
    }

    #[tokio::test]
    async fn test_same_hash_from_another_host() {
        let storage = Arc::new(MemoryStorage::new());
        let a = AuditSaver::new(storage.clone(), "ftp.foo.com");
        let b = AuditSaver::new(storage.clone(), "sftp.bar.com");
        a.save("abc").await.unwrap();
        b.save("abc").await.unwrap();
        assert_eq!(storage.len(), 2);
        assert_eq!(storage.records().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_hash_rejected() {
        let saver = AuditSaver::new(Arc::new(MemoryStorage::new()), "ftp.foo.com");
        assert!(matches!(saver.save("").await, Err(AuditError::MissingHash)));
    }

    #[tokio::test]
    async fn test_concurrent_saves() {
        let storage = Arc::new(MemoryStorage::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let saver = AuditSaver::new(storage.clone(), "ftp.foo.com");
            handles.push(tokio::spawn(async move {
                saver.save(&format!("hash-{}", i % 8)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(storage.len(), 8);
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Incoming).unwrap(), "\"incoming\"");
        assert_eq!(Direction::Outgoing.to_string(), "outgoing");
    }
}
