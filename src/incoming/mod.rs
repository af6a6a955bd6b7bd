//! ODFI file ingestion
//!
//! ```text
//! Agent ──download──► staging dir ──scan──► ach::Reader ──► hashes
//!                                                   │
//!                                AuditSaver ◄───────┤
//!                                Processors ◄───────┘
//! ```

pub mod download;
pub mod hash;
pub mod processor;
pub mod processors;
pub mod scanner;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

pub use download::{cleanup_remote, process_downloads, DownloadedFiles, Downloader};
pub use hash::populate_hashes;
pub use processor::{Processor, Processors};
pub use processors::{
    CorrectionProcessor, EventSink, IncomingEvent, MemorySink, PrenoteProcessor, ReturnProcessor,
};
pub use scanner::{process_dir, process_file};

use crate::ach::{self, FieldError};
use crate::audit::{AuditError, AuditSaver, AuditStorage};
use crate::config::IngestionConfig;
use crate::transfer::{Agent, TransferError};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Nothing usable could be parsed
    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ach::ReadError,
    },

    #[error("hashing {}: {source}", path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("processor {name}: {message}")]
    Processor { name: &'static str, message: String },

    #[error("event sink closed")]
    SinkClosed,

    /// Several independent failures, collected after every sibling ran
    #[error("{}", Aggregate(.0))]
    Multiple(Vec<IngestError>),
}

struct Aggregate<'a>(&'a [IngestError]);

impl fmt::Display for Aggregate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s): ", self.0.len())?;
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl IngestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn processor(name: &'static str, message: impl fmt::Display) -> Self {
        IngestError::Processor {
            name,
            message: message.to_string(),
        }
    }

    /// `Ok` for no errors, the single error, or an aggregate
    pub fn collect(mut errors: Vec<IngestError>) -> Result<(), IngestError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(IngestError::Multiple(errors)),
        }
    }

    /// Number of underlying failures
    pub fn count(&self) -> usize {
        match self {
            IngestError::Multiple(errors) => errors.iter().map(|e| e.count()).sum(),
            _ => 1,
        }
    }
}

/// A parsed and identified file handed to processors
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub filename: String,
    pub path: PathBuf,
    /// Remote host the file came from
    pub hostname: String,
    /// Audit identity, the file id or a digest of the raw bytes
    pub hash: String,
    pub file: ach::File,
    /// Validation problems tolerated while parsing
    pub parse_errors: Vec<FieldError>,
}

/// Download, audit and process everything an agent has waiting, then clean up
/// the local staging tree. The staging tree is removed on every path, the
/// first error is returned.
pub async fn ingest(
    agent: &dyn Agent,
    cfg: &IngestionConfig,
    storage: Arc<dyn AuditStorage>,
    processors: &Processors,
) -> Result<DownloadedFiles, IngestError> {
    let downloader = Downloader::from_config(cfg);
    let files = downloader.copy_files_from_remote(agent).await?;
    info!(
        "incoming: staged {} file(s) from {} in {}",
        files.len(),
        agent.id(),
        files.root.display()
    );

    let saver = AuditSaver::new(storage, agent.hostname());
    let processed = process_downloads(&files, &saver, processors).await;

    let cleaned = match &processed {
        Ok(()) if cfg.cleanup_remote => cleanup_remote(agent, &files).await,
        _ => Ok(()),
    };
    if let Err(e) = files.remove_staging().await {
        warn!("incoming: removing {}: {}", files.root.display(), e);
    }
    processed.and(cleaned).map(|_| files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryStorage;
    use crate::config::{AgentConfig, AgentPaths};
    use crate::transfer::{MockConnector, MockRemote, TransferAgent};

    #[test]
    fn test_collect() {
        assert!(IngestError::collect(Vec::new()).is_ok());

        let one = IngestError::collect(vec![IngestError::SinkClosed]).unwrap_err();
        assert!(matches!(one, IngestError::SinkClosed));

        let many = IngestError::collect(vec![
            IngestError::processor("a", "boom"),
            IngestError::processor("b", "bang"),
        ])
        .unwrap_err();
        assert_eq!(many.count(), 2);
        assert_eq!(
            many.to_string(),
            "2 error(s): processor a: boom; processor b: bang"
        );
    }

    async fn agent(remote: &MockRemote) -> TransferAgent<MockConnector> {
        let cfg = AgentConfig {
            id: "ingest".to_string(),
            paths: AgentPaths {
                inbound: "inbound".to_string(),
                outbound: "outbound".to_string(),
                reconciliation: "reconciliation".to_string(),
                returns: "returned".to_string(),
            },
            ..Default::default()
        };
        let connector = MockConnector::new(remote.clone()).with_hostname("ingest.local:22");
        TransferAgent::connect(cfg, connector).await.unwrap()
    }

    #[tokio::test]
    async fn test_ingest_end_to_end() {
        let remote = MockRemote::new();
        remote.add_file("inbound/ppd.ach", ach::testdata::ppd_credit_file().to_ach_string());
        remote.add_file("returned/return.ach", ach::testdata::return_file().to_ach_string());
        remote.add_dir("reconciliation");
        let agent = agent(&remote).await;

        let staging = tempfile::tempdir().unwrap();
        let cfg = IngestionConfig {
            staging_dir: Some(staging.path().to_path_buf()),
            cleanup_remote: true,
        };
        let storage = Arc::new(MemoryStorage::new());
        let sink = Arc::new(MemorySink::new());
        let mut processors = Processors::new();
        processors.push(ReturnProcessor::new(sink.clone()));

        let files = ingest(&agent, &cfg, storage.clone(), &processors).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(storage.len(), 2);
        assert_eq!(sink.events().len(), 1);

        // remote copies removed, local staging removed
        assert!(remote.file("inbound/ppd.ach").is_none());
        assert!(remote.file("returned/return.ach").is_none());
        assert!(!files.root.exists());
    }

    #[tokio::test]
    async fn test_ingest_keeps_remote_files_on_failure() {
        let remote = MockRemote::new();
        remote.add_file("inbound/garbage.ach", b"invalid-ach-file".to_vec());
        remote.add_dir("reconciliation");
        remote.add_dir("returned");
        let agent = agent(&remote).await;

        let staging = tempfile::tempdir().unwrap();
        let cfg = IngestionConfig {
            staging_dir: Some(staging.path().to_path_buf()),
            cleanup_remote: true,
        };
        let err = ingest(&agent, &cfg, Arc::new(MemoryStorage::new()), &Processors::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Parse { .. }), "{}", err);
        assert!(remote.file("inbound/garbage.ach").is_some());
    }

    /// Delegates to a mock agent but refuses every delete
    struct ReadOnlyAgent(TransferAgent<MockConnector>);

    #[async_trait::async_trait]
    impl Agent for ReadOnlyAgent {
        fn id(&self) -> &str {
            self.0.id()
        }

        fn protocol(&self) -> crate::transfer::Protocol {
            self.0.protocol()
        }

        fn hostname(&self) -> &str {
            self.0.hostname()
        }

        fn inbound_path(&self) -> &str {
            self.0.inbound_path()
        }

        fn outbound_path(&self) -> &str {
            self.0.outbound_path()
        }

        fn reconciliation_path(&self) -> &str {
            self.0.reconciliation_path()
        }

        fn return_path(&self) -> &str {
            self.0.return_path()
        }

        async fn get_inbound_files(&self) -> Result<Vec<crate::transfer::File>, TransferError> {
            self.0.get_inbound_files().await
        }

        async fn get_reconciliation_files(
            &self,
        ) -> Result<Vec<crate::transfer::File>, TransferError> {
            self.0.get_reconciliation_files().await
        }

        async fn get_return_files(&self) -> Result<Vec<crate::transfer::File>, TransferError> {
            self.0.get_return_files().await
        }

        async fn upload_file(&self, file: crate::transfer::File) -> Result<(), TransferError> {
            self.0.upload_file(file).await
        }

        async fn delete(&self, path: &str) -> Result<(), TransferError> {
            Err(TransferError::op(
                self.protocol(),
                "remove",
                path,
                "permission denied",
            ))
        }

        async fn ping(&self) -> Result<(), TransferError> {
            self.0.ping().await
        }

        async fn close(&self) -> Result<(), TransferError> {
            self.0.close().await
        }
    }

    #[tokio::test]
    async fn test_ingest_removes_staging_when_remote_cleanup_fails() {
        let remote = MockRemote::new();
        remote.add_file("inbound/ppd.ach", ach::testdata::ppd_credit_file().to_ach_string());
        remote.add_dir("reconciliation");
        remote.add_dir("returned");
        let agent = ReadOnlyAgent(agent(&remote).await);

        let staging = tempfile::tempdir().unwrap();
        let cfg = IngestionConfig {
            staging_dir: Some(staging.path().to_path_buf()),
            cleanup_remote: true,
        };
        let storage = Arc::new(MemoryStorage::new());
        let err = ingest(&agent, &cfg, storage.clone(), &Processors::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Transfer(_)), "{}", err);
        assert!(err.to_string().contains("permission denied"), "{}", err);

        // processed and audited, remote kept, nothing left on local disk
        assert_eq!(storage.len(), 1);
        assert!(remote.file("inbound/ppd.ach").is_some());
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }
}
