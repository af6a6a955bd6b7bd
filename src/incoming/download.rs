//! Staging remote files on local disk
//!
//! Each download run gets its own directory under the staging root:
//!
//! ```text
//! <staging>/<agent id>-<timestamp>-<seq>/
//!     inbound/
//!     reconciliation/
//!     return/
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::processor::Processors;
use super::scanner::process_dir;
use super::IngestError;
use crate::audit::AuditSaver;
use crate::config::IngestionConfig;
use crate::transfer::path_utils::{base_name, join_remote_path};
use crate::transfer::{Agent, File};

pub const INBOUND_DIR: &str = "inbound";
pub const RECONCILIATION_DIR: &str = "reconciliation";
pub const RETURN_DIR: &str = "return";

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("odfi-link")
}

/// Directory-safe form of an agent id
fn safe_name(id: &str) -> String {
    let name: String = id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    match name.trim_matches('.') {
        "" => "agent".to_string(),
        _ => name,
    }
}

/// Copies every waiting file from an agent into a fresh staging directory
#[derive(Debug, Clone)]
pub struct Downloader {
    staging_dir: PathBuf,
}

impl Downloader {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub fn from_config(cfg: &IngestionConfig) -> Self {
        Self::new(cfg.staging_dir.clone().unwrap_or_else(default_staging_dir))
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Download inbound, reconciliation and return files. Remote files are
    /// left in place. On failure the partial staging tree is removed.
    pub async fn copy_files_from_remote(
        &self,
        agent: &dyn Agent,
    ) -> Result<DownloadedFiles, IngestError> {
        let root = self.staging_dir.join(format!(
            "{}-{}-{}",
            safe_name(agent.id()),
            Utc::now().format("%Y%m%dT%H%M%S"),
            RUN_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let mut files = DownloadedFiles {
            root,
            hostname: agent.hostname().to_string(),
            inbound: Vec::new(),
            reconciliation: Vec::new(),
            returns: Vec::new(),
        };

        match self.copy_into(agent, &mut files).await {
            Ok(()) => Ok(files),
            Err(e) => {
                if let Err(rm) = files.remove_staging().await {
                    warn!("incoming: removing {}: {}", files.root.display(), rm);
                }
                Err(e)
            }
        }
    }

    async fn copy_into(
        &self,
        agent: &dyn Agent,
        files: &mut DownloadedFiles,
    ) -> Result<(), IngestError> {
        let inbound = agent.get_inbound_files().await?;
        files.inbound = save_all(&files.inbound_dir(), inbound).await?;

        let reconciliation = agent.get_reconciliation_files().await?;
        files.reconciliation = save_all(&files.reconciliation_dir(), reconciliation).await?;

        let returns = agent.get_return_files().await?;
        files.returns = save_all(&files.return_dir(), returns).await?;

        debug!(
            "incoming: {} inbound, {} reconciliation, {} return file(s) from {}",
            files.inbound.len(),
            files.reconciliation.len(),
            files.returns.len(),
            agent.id()
        );
        Ok(())
    }
}

/// Write each file into `dir`, returning the names written
async fn save_all(dir: &Path, remote: Vec<File>) -> Result<Vec<String>, IngestError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| IngestError::io(dir, e))?;

    let mut names = Vec::with_capacity(remote.len());
    for file in remote {
        let name = base_name(&file.filename).to_string();
        if name.is_empty() || name != file.filename {
            warn!("incoming: skipping unsafe remote filename {:?}", file.filename);
            continue;
        }
        let path = dir.join(&name);
        let contents = file
            .read_all()
            .await
            .map_err(|e| IngestError::io(&path, e))?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| IngestError::io(&path, e))?;
        names.push(name);
    }
    Ok(names)
}

/// Result of one download run
#[derive(Debug, Clone)]
pub struct DownloadedFiles {
    /// Staging directory for this run
    pub root: PathBuf,
    pub hostname: String,
    pub inbound: Vec<String>,
    pub reconciliation: Vec<String>,
    pub returns: Vec<String>,
}

impl DownloadedFiles {
    pub fn inbound_dir(&self) -> PathBuf {
        self.root.join(INBOUND_DIR)
    }

    pub fn reconciliation_dir(&self) -> PathBuf {
        self.root.join(RECONCILIATION_DIR)
    }

    pub fn return_dir(&self) -> PathBuf {
        self.root.join(RETURN_DIR)
    }

    pub fn len(&self) -> usize {
        self.inbound.len() + self.reconciliation.len() + self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the local staging tree. Missing trees are fine.
    pub async fn remove_staging(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Scan every staged directory that received files
pub async fn process_downloads(
    files: &DownloadedFiles,
    saver: &AuditSaver,
    processors: &Processors,
) -> Result<(), IngestError> {
    let mut errors = Vec::new();
    for (names, dir) in [
        (&files.inbound, files.inbound_dir()),
        (&files.reconciliation, files.reconciliation_dir()),
        (&files.returns, files.return_dir()),
    ] {
        if names.is_empty() {
            continue;
        }
        if let Err(e) = process_dir(&dir, saver, processors).await {
            errors.push(e);
        }
    }
    IngestError::collect(errors)
}

/// Delete every downloaded file from the remote host
pub async fn cleanup_remote(agent: &dyn Agent, files: &DownloadedFiles) -> Result<(), IngestError> {
    let mut errors = Vec::new();
    for (names, remote_dir) in [
        (&files.inbound, agent.inbound_path()),
        (&files.reconciliation, agent.reconciliation_path()),
        (&files.returns, agent.return_path()),
    ] {
        for name in names {
            let path = join_remote_path(remote_dir, name);
            match agent.delete(&path).await {
                Ok(()) => debug!("incoming: deleted {} from {}", path, agent.id()),
                Err(e) => {
                    warn!("incoming: deleting {} from {}: {}", path, agent.id(), e);
                    errors.push(e.into());
                }
            }
        }
    }
    if errors.is_empty() {
        info!("incoming: removed {} remote file(s) from {}", files.len(), agent.id());
    }
    IngestError::collect(errors)
}
