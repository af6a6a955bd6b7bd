//! In-memory remote host
//!
//! `MockConnector` behaves like a small FTP/SFTP server that lives in the
//! process. Useful for exercising agents and the download pipeline without a
//! network, and for simulating dial failures and dropped connections.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::connector::{Connector, RemoteEntry, RemoteSession};
use super::error::{Protocol, TransferError};
use super::path_utils::join_remote_path;

const PROTOCOL: Protocol = Protocol::Mock;

#[derive(Default)]
struct MockFs {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    modes: BTreeMap<String, u32>,
    connects: u32,
    failing_connects: u32,
    /// Bumped to invalidate every open session
    generation: u64,
}

/// Shared handle to the in-memory filesystem
#[derive(Clone, Default)]
pub struct MockRemote {
    fs: Arc<Mutex<MockFs>>,
}

fn normalize(path: &str) -> String {
    let path = path.trim_start_matches("./").trim_matches('/');
    if path == "." {
        String::new()
    } else {
        path.to_string()
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory and any missing parents
    pub fn add_dir(&self, path: &str) {
        let mut fs = self.fs.lock();
        let mut current = String::new();
        for part in normalize(path).split('/').filter(|p| !p.is_empty()) {
            current = join_remote_path(&current, part);
            fs.dirs.insert(current.clone());
        }
    }

    /// Create a file, creating parent directories as needed
    pub fn add_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let path = normalize(path);
        let (parent, _) = split_parent(&path);
        self.add_dir(parent);
        let mut fs = self.fs.lock();
        fs.files.insert(path.clone(), contents.into());
        fs.modes.insert(path, 0o644);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.fs.lock().files.get(&normalize(path)).cloned()
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        self.fs.lock().modes.get(&normalize(path)).copied()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.fs.lock().dirs.contains(&normalize(path))
    }

    /// Number of successful connects so far
    pub fn connects(&self) -> u32 {
        self.fs.lock().connects
    }

    /// Make the next `n` dial attempts fail
    pub fn fail_next_connects(&self, n: u32) {
        self.fs.lock().failing_connects = n;
    }

    /// Break every open session, as if the server dropped them
    pub fn drop_connections(&self) {
        self.fs.lock().generation += 1;
    }
}

pub struct MockConnector {
    remote: MockRemote,
    hostname: String,
    dial_attempts: u32,
    create_outbound_dir: bool,
}

impl MockConnector {
    pub fn new(remote: MockRemote) -> Self {
        Self {
            remote,
            hostname: "mock.local:22".to_string(),
            dial_attempts: 3,
            create_outbound_dir: true,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_dial_attempts(mut self, attempts: u32) -> Self {
        self.dial_attempts = attempts;
        self
    }

    pub fn skip_directory_creation(mut self) -> Self {
        self.create_outbound_dir = false;
        self
    }

    pub fn remote(&self) -> &MockRemote {
        &self.remote
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Session = MockSession;

    fn protocol(&self) -> Protocol {
        PROTOCOL
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn dial_attempts(&self) -> u32 {
        self.dial_attempts
    }

    fn retry_backoff(&self) -> Duration {
        Duration::from_millis(1)
    }

    fn create_outbound_dir(&self) -> bool {
        self.create_outbound_dir
    }

    async fn connect(&self) -> Result<MockSession, TransferError> {
        let mut fs = self.remote.fs.lock();
        if fs.failing_connects > 0 {
            fs.failing_connects -= 1;
            return Err(TransferError::connection(PROTOCOL, "connection refused"));
        }
        fs.connects += 1;
        Ok(MockSession {
            remote: self.remote.clone(),
            generation: fs.generation,
            closed: false,
        })
    }
}

pub struct MockSession {
    remote: MockRemote,
    generation: u64,
    closed: bool,
}

impl MockSession {
    fn fs(&self) -> Result<parking_lot::MutexGuard<'_, MockFs>, TransferError> {
        let fs = self.remote.fs.lock();
        if self.closed || fs.generation != self.generation {
            return Err(TransferError::connection(PROTOCOL, "connection lost"));
        }
        Ok(fs)
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn check_alive(&mut self) -> Result<(), TransferError> {
        self.fs().map(|_| ())
    }

    async fn read_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let fs = self.fs()?;
        let dir = normalize(dir);
        if !dir.is_empty() && !fs.dirs.contains(&dir) {
            return Err(TransferError::not_found(PROTOCOL, dir));
        }

        let mut entries: Vec<RemoteEntry> = fs
            .dirs
            .iter()
            .filter(|d| split_parent(d).0 == dir && !d.is_empty())
            .map(|d| RemoteEntry::dir(split_parent(d).1))
            .collect();
        entries.extend(
            fs.files
                .keys()
                .filter(|f| split_parent(f).0 == dir)
                .map(|f| RemoteEntry::file(split_parent(f).1)),
        );
        Ok(entries)
    }

    async fn read_file(&mut self, path: &str) -> Result<Vec<u8>, TransferError> {
        let fs = self.fs()?;
        let path = normalize(path);
        fs.files
            .get(&path)
            .cloned()
            .ok_or_else(|| TransferError::not_found(PROTOCOL, path))
    }

    async fn stat(&mut self, path: &str) -> Result<Option<RemoteEntry>, TransferError> {
        let fs = self.fs()?;
        let path = normalize(path);
        let name = split_parent(&path).1.to_string();
        if path.is_empty() || fs.dirs.contains(&path) {
            Ok(Some(RemoteEntry::dir(name)))
        } else if fs.files.contains_key(&path) {
            Ok(Some(RemoteEntry::file(name)))
        } else {
            Ok(None)
        }
    }

    async fn create_dir(&mut self, path: &str) -> Result<(), TransferError> {
        let mut fs = self.fs()?;
        let path = normalize(path);
        let (parent, _) = split_parent(&path);
        if !parent.is_empty() && !fs.dirs.contains(parent) {
            return Err(TransferError::op(PROTOCOL, "mkdir", path.as_str(), "parent does not exist"));
        }
        fs.dirs.insert(path);
        Ok(())
    }

    async fn write_file(
        &mut self,
        dir: &str,
        name: &str,
        contents: &[u8],
    ) -> Result<(), TransferError> {
        let mut fs = self.fs()?;
        let dir = normalize(dir);
        if !dir.is_empty() && !fs.dirs.contains(&dir) {
            return Err(TransferError::op(PROTOCOL, "create", join_remote_path(&dir, name), "no such directory"));
        }
        let path = join_remote_path(&dir, name);
        fs.files.insert(path.clone(), contents.to_vec());
        fs.modes.insert(path, 0o600);
        Ok(())
    }

    async fn remove_file(&mut self, path: &str) -> Result<(), TransferError> {
        let mut fs = self.fs()?;
        let path = normalize(path);
        if fs.files.remove(&path).is_none() {
            return Err(TransferError::not_found(PROTOCOL, path));
        }
        fs.modes.remove(&path);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        self.closed = true;
        Ok(())
    }
}
