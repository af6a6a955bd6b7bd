//! Transfer agents - move ACH files to and from remote hosts
//!
//! # Features
//! - One [`Agent`] contract over FTP (plain or explicit TLS) and SFTP
//! - Lazy, self-healing connections serialized behind one lock per agent
//! - Outbound IP allow-listing before the first dial
//! - Per-host health gauge and dial retry counter (see [`health`])

pub mod agent;
pub mod allowlist;
pub mod connector;
pub mod error;
pub mod ftp;
pub mod health;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod path_utils;
pub mod sftp;

use std::fmt;
use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use agent::TransferAgent;
pub use connector::{Connector, RemoteEntry, RemoteSession};
pub use error::{Protocol, TransferError};
pub use ftp::{FtpAgent, FtpConnector};
pub use health::{agent_up, connection_retries, ConnectionState};
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockConnector, MockRemote};
pub use sftp::{SftpAgent, SftpConnector};

use crate::config::AgentConfig;

/// A named file payload moving to or from a remote host.
///
/// `contents` can be read once. Dropping the `File` releases the stream.
pub struct File {
    pub filename: String,
    pub contents: Box<dyn AsyncRead + Send + Unpin>,
}

impl File {
    pub fn new(filename: impl Into<String>, contents: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            filename: filename.into(),
            contents: Box::new(contents),
        }
    }

    pub fn from_bytes(filename: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self::new(filename, Cursor::new(contents.into()))
    }

    /// Consume the file, returning every remaining byte
    pub async fn read_all(mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.contents.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Operations available against one configured remote target.
///
/// Every method that touches the remote host is serialized per agent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    fn protocol(&self) -> Protocol;

    /// Configured `host:port`, empty when no endpoint is configured
    fn hostname(&self) -> &str;

    fn inbound_path(&self) -> &str;
    fn outbound_path(&self) -> &str;
    fn reconciliation_path(&self) -> &str;
    fn return_path(&self) -> &str;

    /// Every regular file directly inside the inbound path
    async fn get_inbound_files(&self) -> Result<Vec<File>, TransferError>;
    async fn get_reconciliation_files(&self) -> Result<Vec<File>, TransferError>;
    async fn get_return_files(&self) -> Result<Vec<File>, TransferError>;

    /// Write `file` as `<outbound path>/<base name>`
    async fn upload_file(&self, file: File) -> Result<(), TransferError>;

    /// Remove `path`; a missing path is not an error
    async fn delete(&self, path: &str) -> Result<(), TransferError>;

    async fn ping(&self) -> Result<(), TransferError>;

    /// Release the session. Safe to call repeatedly.
    async fn close(&self) -> Result<(), TransferError>;
}

/// Build and connect the agent described by `cfg`
pub async fn new_agent(cfg: AgentConfig) -> Result<Box<dyn Agent>, TransferError> {
    cfg.validate()?;

    if let Some(ftp) = cfg.ftp.clone() {
        let connector = FtpConnector::new(ftp)?;
        let agent = TransferAgent::connect(cfg, connector).await?;
        return Ok(Box::new(agent));
    }
    if let Some(sftp) = cfg.sftp.clone() {
        let connector = SftpConnector::new(sftp)?;
        let agent = TransferAgent::connect(cfg, connector).await?;
        return Ok(Box::new(agent));
    }
    Err(crate::config::ConfigError::AmbiguousProtocol(cfg.id.clone()).into())
}
