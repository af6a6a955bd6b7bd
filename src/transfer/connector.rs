//! Protocol connection seams
//!
//! A [`Connector`] knows how to dial one remote host and produce a live
//! [`RemoteSession`]. Sessions expose only the primitive operations the
//! generic agent needs; the agent owns locking, reconnects and health.

use std::time::Duration;

use async_trait::async_trait;

use super::error::{Protocol, TransferError};

/// One directory entry as reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// A live, authenticated session with a remote host.
///
/// Sessions are never shared: the owning agent hands out `&mut` access
/// while holding its lock.
#[async_trait]
pub trait RemoteSession: Send {
    /// Cheap liveness check used before reusing an idle session
    async fn check_alive(&mut self) -> Result<(), TransferError>;

    /// Entries directly inside `dir` (`.` and `..` excluded)
    async fn read_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError>;

    /// Full contents of a remote file
    async fn read_file(&mut self, path: &str) -> Result<Vec<u8>, TransferError>;

    /// `Ok(None)` when nothing exists at `path`
    async fn stat(&mut self, path: &str) -> Result<Option<RemoteEntry>, TransferError>;

    async fn create_dir(&mut self, path: &str) -> Result<(), TransferError>;

    /// Create or truncate `dir/name` and write `contents` to it
    async fn write_file(
        &mut self,
        dir: &str,
        name: &str,
        contents: &[u8],
    ) -> Result<(), TransferError>;

    async fn remove_file(&mut self, path: &str) -> Result<(), TransferError>;

    async fn close(&mut self) -> Result<(), TransferError>;
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: RemoteSession + 'static;

    fn protocol(&self) -> Protocol;

    /// `host:port` this connector dials
    fn hostname(&self) -> &str;

    /// Number of dial attempts before giving up
    fn dial_attempts(&self) -> u32 {
        1
    }

    /// Fixed pause between dial attempts
    fn retry_backoff(&self) -> Duration {
        Duration::from_millis(250)
    }

    /// Whether uploads create a missing outbound directory
    fn create_outbound_dir(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<Self::Session, TransferError>;
}
