//! Protocol agnostic transfer agent
//!
//! `TransferAgent<C>` drives any [`Connector`] behind the [`Agent`] contract.
//!
//! # Connection model
//!
//! ```text
//! Disconnected ──acquire──► Connecting ──ok──► Connected
//!      ▲                        │                  │
//!      │                        └─all attempts──► Failed
//!      └──────── operation error / close ──────────┘
//! ```
//!
//! Exactly one session exists per agent and every operation holds the
//! agent's mutex for its full duration, so callers sharing an agent are
//! serialized. A session is checked before reuse and silently replaced when
//! the check fails. After any failed operation the session is dropped and the
//! next call dials fresh.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::allowlist::reject_outbound_ip_range;
use super::connector::{Connector, RemoteSession};
use super::error::{Protocol, TransferError};
use super::health::{get_agent_metrics, ConnectionState};
use super::path_utils::{base_name, join_remote_path};
use super::{Agent, File};
use crate::config::AgentConfig;

struct SessionSlot<S> {
    session: Option<S>,
    state: ConnectionState,
    /// The outbound IP allow-list is evaluated once, before the first dial
    host_allowed: bool,
}

pub struct TransferAgent<C: Connector> {
    cfg: AgentConfig,
    connector: C,
    slot: Mutex<SessionSlot<C::Session>>,
}

impl<C: Connector> TransferAgent<C> {
    /// Create an agent without dialing. The first operation connects.
    pub fn new(cfg: AgentConfig, connector: C) -> Self {
        Self {
            cfg,
            connector,
            slot: Mutex::new(SessionSlot {
                session: None,
                state: ConnectionState::Disconnected,
                host_allowed: false,
            }),
        }
    }

    /// Create an agent and establish its first session.
    ///
    /// Fails when the host is not allow-listed or every dial attempt fails.
    pub async fn connect(cfg: AgentConfig, connector: C) -> Result<Self, TransferError> {
        let agent = Self::new(cfg, connector);
        {
            let mut slot = agent.slot.lock().await;
            let result = agent.acquire(&mut slot).await.map(|_| ());
            agent.record(&result);
            if let Err(e) = result {
                warn!(
                    "{}: agent {} failed to connect to {}: {}",
                    agent.protocol(),
                    agent.cfg.id,
                    agent.connector.hostname(),
                    e
                );
                return Err(e);
            }
        }
        info!(
            "{}: agent {} connected to {}",
            agent.protocol(),
            agent.cfg.id,
            agent.connector.hostname()
        );
        Ok(agent)
    }

    pub async fn state(&self) -> ConnectionState {
        self.slot.lock().await.state
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn record<T, E>(&self, result: &Result<T, E>) {
        get_agent_metrics().record(self.protocol(), self.connector.hostname(), result);
    }

    /// Return a live session, reconnecting if the current one is gone.
    ///
    /// Must be called with the slot lock held.
    async fn acquire<'a>(
        &self,
        slot: &'a mut SessionSlot<C::Session>,
    ) -> Result<&'a mut C::Session, TransferError> {
        let alive = match slot.session.as_mut() {
            Some(session) => match session.check_alive().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("{}: stale session, reconnecting: {}", self.protocol(), e);
                    false
                }
            },
            None => false,
        };

        if !alive {
            if let Some(mut stale) = slot.session.take() {
                if let Err(e) = stale.close().await {
                    debug!("{}: closing stale session: {}", self.protocol(), e);
                }
            }

            if !slot.host_allowed {
                reject_outbound_ip_range(
                    self.protocol(),
                    &self.cfg.split_allowed_ips(),
                    self.connector.hostname(),
                )
                .await?;
                slot.host_allowed = true;
            }

            slot.state = ConnectionState::Connecting;
            match self.dial().await {
                Ok(session) => {
                    slot.session = Some(session);
                    slot.state = ConnectionState::Connected;
                }
                Err(e) => {
                    slot.state = ConnectionState::Failed;
                    return Err(e);
                }
            }
        }

        slot.session.as_mut().ok_or_else(|| {
            TransferError::connection(self.protocol(), "no session after connect")
        })
    }

    /// Bounded dial loop with a fixed pause between attempts.
    ///
    /// Configuration errors end the loop immediately, every other failure is
    /// retried the same way.
    async fn dial(&self) -> Result<C::Session, TransferError> {
        let attempts = self.connector.dial_attempts().max(1);
        let hostname = self.connector.hostname();
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                get_agent_metrics().increment_retries(self.protocol(), hostname);
                tokio::time::sleep(self.connector.retry_backoff()).await;
            }
            debug!(
                "{}: dialing {} (attempt {}/{})",
                self.protocol(),
                hostname,
                attempt + 1,
                attempts
            );
            match self.connector.connect().await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_config() => return Err(e),
                Err(e) => {
                    warn!(
                        "{}: dial {} attempt {}/{} failed: {}",
                        self.protocol(),
                        hostname,
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| TransferError::connection(self.protocol(), "no dial attempted")))
    }

    /// Record health and drop the session after a failed operation.
    ///
    /// Takes the bare outcome so the operation's payload (which may hold
    /// non-`Sync` streams) is never borrowed across the close.
    async fn finish(
        &self,
        slot: &mut SessionSlot<C::Session>,
        result: Result<(), &TransferError>,
    ) {
        self.record(&result);
        if result.is_err() && slot.state == ConnectionState::Connected {
            if let Some(mut session) = slot.session.take() {
                if let Err(e) = session.close().await {
                    debug!("{}: closing failed session: {}", self.protocol(), e);
                }
            }
            slot.state = ConnectionState::Disconnected;
        }
    }

    async fn read_files(&self, dir: &str) -> Result<Vec<File>, TransferError> {
        let mut slot = self.slot.lock().await;
        let result = self.read_files_locked(&mut slot, dir).await;
        let outcome = result.as_ref().map(|_| ());
        self.finish(&mut slot, outcome).await;
        result
    }

    async fn read_files_locked(
        &self,
        slot: &mut SessionSlot<C::Session>,
        dir: &str,
    ) -> Result<Vec<File>, TransferError> {
        let session = self.acquire(slot).await?;
        let entries = session.read_dir(dir).await?;

        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            // only one level deep
            if entry.is_dir {
                debug!("{}: skipping directory {}/{}", self.protocol(), dir, entry.name);
                continue;
            }
            let path = join_remote_path(dir, &entry.name);
            let contents = session.read_file(&path).await?;
            debug!("{}: read {} bytes from {}", self.protocol(), contents.len(), path);
            files.push(File::from_bytes(entry.name, contents));
        }

        info!(
            "{}: found {} file(s) in {} on {}",
            self.protocol(),
            files.len(),
            dir,
            self.connector.hostname()
        );
        Ok(files)
    }

    async fn upload_locked(
        &self,
        slot: &mut SessionSlot<C::Session>,
        name: &str,
        contents: &[u8],
    ) -> Result<(), TransferError> {
        let outbound = self.cfg.paths.outbound.as_str();
        let session = self.acquire(slot).await?;

        if self.connector.create_outbound_dir() && !outbound.is_empty() {
            match session.stat(outbound).await? {
                Some(entry) if entry.is_dir => {}
                Some(_) => {
                    return Err(TransferError::op(
                        self.protocol(),
                        "mkdir",
                        outbound,
                        "path exists and is not a directory",
                    ))
                }
                None => {
                    info!("{}: creating outbound directory {}", self.protocol(), outbound);
                    session.create_dir(outbound).await?;
                }
            }
        }

        session.write_file(outbound, name, contents).await?;
        info!(
            "{}: uploaded {} ({} bytes) to {} on {}",
            self.protocol(),
            name,
            contents.len(),
            outbound,
            self.connector.hostname()
        );
        Ok(())
    }

    async fn delete_locked(
        &self,
        slot: &mut SessionSlot<C::Session>,
        path: &str,
    ) -> Result<(), TransferError> {
        let session = self.acquire(slot).await?;
        if session.stat(path).await?.is_none() {
            debug!("{}: delete {}: not found", self.protocol(), path);
            return Ok(());
        }
        match session.remove_file(path).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl<C: Connector> Agent for TransferAgent<C> {
    fn id(&self) -> &str {
        &self.cfg.id
    }

    fn protocol(&self) -> Protocol {
        self.connector.protocol()
    }

    fn hostname(&self) -> &str {
        self.cfg.hostname()
    }

    fn inbound_path(&self) -> &str {
        &self.cfg.paths.inbound
    }

    fn outbound_path(&self) -> &str {
        &self.cfg.paths.outbound
    }

    fn reconciliation_path(&self) -> &str {
        &self.cfg.paths.reconciliation
    }

    fn return_path(&self) -> &str {
        &self.cfg.paths.returns
    }

    async fn get_inbound_files(&self) -> Result<Vec<File>, TransferError> {
        self.read_files(&self.cfg.paths.inbound).await
    }

    async fn get_reconciliation_files(&self) -> Result<Vec<File>, TransferError> {
        self.read_files(&self.cfg.paths.reconciliation).await
    }

    async fn get_return_files(&self) -> Result<Vec<File>, TransferError> {
        self.read_files(&self.cfg.paths.returns).await
    }

    async fn upload_file(&self, file: File) -> Result<(), TransferError> {
        let protocol = self.protocol();
        let filename = file.filename.clone();
        let name = base_name(&filename).to_string();

        // Consuming the File releases its content stream on every path below.
        let contents = file
            .read_all()
            .await
            .map_err(|e| TransferError::io(protocol, "read", filename.as_str(), e))?;
        if name.is_empty() {
            return Err(TransferError::op(protocol, "upload", filename, "empty filename"));
        }

        let mut slot = self.slot.lock().await;
        let result = self.upload_locked(&mut slot, &name, &contents).await;
        let outcome = result.as_ref().map(|_| ());
        self.finish(&mut slot, outcome).await;
        result
    }

    async fn delete(&self, path: &str) -> Result<(), TransferError> {
        let mut slot = self.slot.lock().await;
        let result = self.delete_locked(&mut slot, path).await;
        let outcome = result.as_ref().map(|_| ());
        self.finish(&mut slot, outcome).await;
        result
    }

    async fn ping(&self) -> Result<(), TransferError> {
        let mut slot = self.slot.lock().await;
        let result = match self.acquire(&mut slot).await {
            Ok(session) => session.read_dir(".").await.map(|_| ()),
            Err(e) => Err(e),
        };
        let outcome = result.as_ref().map(|_| ());
        self.finish(&mut slot, outcome).await;
        result
    }

    async fn close(&self) -> Result<(), TransferError> {
        let mut slot = self.slot.lock().await;
        if let Some(mut session) = slot.session.take() {
            info!(
                "{}: closing session to {}",
                self.protocol(),
                self.connector.hostname()
            );
            if let Err(e) = session.close().await {
                warn!("{}: error while closing session: {}", self.protocol(), e);
            }
        }
        slot.state = ConnectionState::Disconnected;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AgentPaths;
    use crate::transfer::mock::{MockConnector, MockRemote};
    use crate::transfer::{agent_up, connection_retries};

    fn paths() -> AgentPaths {
        AgentPaths {
            inbound: "inbound".to_string(),
            outbound: "outbound".to_string(),
            reconciliation: "reconciliation".to_string(),
            returns: "returned".to_string(),
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            id: "mock-odfi".to_string(),
            paths: paths(),
            ..Default::default()
        }
    }

    fn seeded_remote() -> MockRemote {
        let remote = MockRemote::new();
        remote.add_file("inbound/iat-credit.ach", b"101 121042882 iat".to_vec());
        remote.add_file("inbound/cor-c01.ach", b"101 cor".to_vec());
        remote.add_file("inbound/prenote-ppd-debit.ach", b"101 prenote".to_vec());
        remote.add_file("reconciliation/ppd-debit.ach", b"5225companyname".to_vec());
        remote.add_file("returned/return-WEB.ach", b"101 091400606 return".to_vec());
        remote.add_dir("outbound");
        remote
    }

    async fn connected(remote: &MockRemote, hostname: &str) -> TransferAgent<MockConnector> {
        let connector = MockConnector::new(remote.clone()).with_hostname(hostname);
        TransferAgent::connect(config(), connector).await.unwrap()
    }

    async fn snapshot(files: Vec<File>) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        for file in files {
            let name = file.filename.clone();
            out.push((name, file.read_all().await.unwrap()));
        }
        out.sort();
        out
    }

    #[tokio::test]
    async fn test_paths() {
        let agent = connected(&seeded_remote(), "paths.local:22").await;
        assert_eq!(agent.id(), "mock-odfi");
        assert_eq!(agent.inbound_path(), "inbound");
        assert_eq!(agent.outbound_path(), "outbound");
        assert_eq!(agent.reconciliation_path(), "reconciliation");
        assert_eq!(agent.return_path(), "returned");
        assert_eq!(agent.protocol(), Protocol::Mock);
        // no ftp/sftp section configured
        assert_eq!(agent.hostname(), "");
    }

    #[tokio::test]
    async fn test_get_files_is_idempotent() {
        let agent = connected(&seeded_remote(), "idempotent.local:22").await;

        let first = snapshot(agent.get_inbound_files().await.unwrap()).await;
        let second = snapshot(agent.get_inbound_files().await.unwrap()).await;
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(first[0].0, "cor-c01.ach");

        let recon = snapshot(agent.get_reconciliation_files().await.unwrap()).await;
        assert_eq!(recon, snapshot(agent.get_reconciliation_files().await.unwrap()).await);
        assert_eq!(recon, vec![("ppd-debit.ach".to_string(), b"5225companyname".to_vec())]);

        let returns = snapshot(agent.get_return_files().await.unwrap()).await;
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0].0, "return-WEB.ach");
    }

    #[tokio::test]
    async fn test_subdirectories_are_skipped() {
        let remote = seeded_remote();
        remote.add_file("returned/extra/nested.ach", b"nested".to_vec());
        remote.add_dir("returned/empty");
        let agent = connected(&remote, "subdir.local:22").await;

        let files = snapshot(agent.get_return_files().await.unwrap()).await;
        assert_eq!(files.len(), 1, "{:?}", files);
        assert_eq!(files[0].0, "return-WEB.ach");
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let remote = MockRemote::new();
        remote.add_dir("inbound");
        let agent = connected(&remote, "empty.local:22").await;
        assert!(agent.get_inbound_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_read_back_and_delete() {
        let remote = seeded_remote();
        let agent = connected(&remote, "upload.local:22").await;

        let content = uuid::Uuid::new_v4().to_string();
        let name = format!("{}.ach", uuid::Uuid::new_v4());
        agent
            .upload_file(File::from_bytes(name.clone(), content.clone()))
            .await
            .unwrap();

        let path = format!("outbound/{}", name);
        assert_eq!(remote.file(&path).unwrap(), content.as_bytes());
        assert_eq!(remote.mode(&path), Some(0o600));

        agent.delete(&path).await.unwrap();
        assert!(remote.file(&path).is_none());
        // deleting again is fine
        agent.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_strips_path_components() {
        let remote = seeded_remote();
        let agent = connected(&remote, "traversal.local:22").await;

        agent
            .upload_file(File::from_bytes("../../../../etc/passwd", b"root".to_vec()))
            .await
            .unwrap();
        assert_eq!(remote.file("outbound/passwd").unwrap(), b"root");
        assert!(remote.file("etc/passwd").is_none());

        let err = agent
            .upload_file(File::from_bytes("../", b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty filename"), "{}", err);
    }

    #[tokio::test]
    async fn test_upload_creates_outbound_dir() {
        let remote = MockRemote::new();
        let agent = connected(&remote, "mkdir.local:22").await;
        assert!(!remote.has_dir("outbound"));

        agent
            .upload_file(File::from_bytes("a.ach", b"a".to_vec()))
            .await
            .unwrap();
        assert!(remote.has_dir("outbound"));
        assert_eq!(remote.file("outbound/a.ach").unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_upload_without_directory_creation() {
        let remote = MockRemote::new();
        let connector = MockConnector::new(remote.clone())
            .with_hostname("nomkdir.local:22")
            .skip_directory_creation();
        let agent = TransferAgent::connect(config(), connector).await.unwrap();

        let err = agent
            .upload_file(File::from_bytes("a.ach", b"a".to_vec()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such directory"), "{}", err);
        assert!(!remote.has_dir("outbound"));
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let agent = connected(&seeded_remote(), "delete.local:22").await;
        agent.delete("/missing.txt").await.unwrap();
        agent.delete("inbound/missing.ach").await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_dropped_session() {
        let remote = seeded_remote();
        let agent = connected(&remote, "reconnect.local:22").await;
        assert_eq!(remote.connects(), 1);

        remote.drop_connections();
        let files = agent.get_inbound_files().await.unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(remote.connects(), 2);
        assert_eq!(agent.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_failed_operation_drops_session() {
        let remote = MockRemote::new();
        let agent = connected(&remote, "opfail.local:22").await;

        // inbound was never created
        let err = agent.get_inbound_files().await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(agent.state().await, ConnectionState::Disconnected);
        assert_eq!(agent_up(Protocol::Mock, "opfail.local:22"), Some(0));

        remote.add_dir("inbound");
        assert!(agent.get_inbound_files().await.unwrap().is_empty());
        assert_eq!(remote.connects(), 2);
        assert_eq!(agent_up(Protocol::Mock, "opfail.local:22"), Some(1));
    }

    #[tokio::test]
    async fn test_dial_retries_then_succeeds() {
        let remote = seeded_remote();
        remote.fail_next_connects(2);
        let agent = connected(&remote, "retry-ok.local:22").await;

        assert_eq!(agent.state().await, ConnectionState::Connected);
        assert_eq!(connection_retries(Protocol::Mock, "retry-ok.local:22"), 2);
        assert_eq!(agent_up(Protocol::Mock, "retry-ok.local:22"), Some(1));
    }

    #[tokio::test]
    async fn test_failed_state_dials_again() {
        let remote = seeded_remote();
        let agent = connected(&remote, "redial.local:22").await;

        remote.drop_connections();
        remote.fail_next_connects(3);
        assert!(agent.get_inbound_files().await.is_err());
        assert_eq!(agent.state().await, ConnectionState::Failed);
        assert_eq!(remote.connects(), 1);

        assert_eq!(agent.get_inbound_files().await.unwrap().len(), 3);
        assert_eq!(agent.state().await, ConnectionState::Connected);
        assert_eq!(remote.connects(), 2);
    }

    #[tokio::test]
    async fn test_dial_gives_up_after_three_attempts() {
        let remote = seeded_remote();
        remote.fail_next_connects(3);
        let connector = MockConnector::new(remote.clone()).with_hostname("retry-fail.local:22");

        let err = TransferAgent::connect(config(), connector).await.err().unwrap();
        assert!(err.to_string().contains("connection refused"), "{}", err);
        assert_eq!(remote.connects(), 0);
        assert_eq!(connection_retries(Protocol::Mock, "retry-fail.local:22"), 2);
        assert_eq!(agent_up(Protocol::Mock, "retry-fail.local:22"), Some(0));
    }

    #[tokio::test]
    async fn test_disallowed_host_never_dials() {
        let remote = seeded_remote();
        let connector = MockConnector::new(remote.clone()).with_hostname("127.0.0.1:22");
        let cfg = AgentConfig {
            allowed_ips: "10.0.0.0/8".to_string(),
            ..config()
        };

        let err = TransferAgent::connect(cfg, connector).await.err().unwrap();
        assert!(err.is_config(), "{}", err);
        assert_eq!(remote.connects(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let remote = seeded_remote();
        let agent = connected(&remote, "close.local:22").await;

        agent.close().await.unwrap();
        agent.close().await.unwrap();
        assert_eq!(agent.state().await, ConnectionState::Disconnected);

        // the next operation dials again
        agent.ping().await.unwrap();
        assert_eq!(remote.connects(), 2);

        let lazy = TransferAgent::new(config(), MockConnector::new(MockRemote::new()));
        lazy.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_session() {
        let remote = seeded_remote();
        let agent = Arc::new(connected(&remote, "concurrent.local:22").await);

        let mut handles = Vec::new();
        for i in 0..16 {
            let agent = agent.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    agent
                        .upload_file(File::from_bytes(format!("{}.ach", i), vec![i as u8; 8]))
                        .await
                } else {
                    agent.get_inbound_files().await.map(|files| assert_eq!(files.len(), 3))
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(remote.connects(), 1);
        assert_eq!(remote.file("outbound/4.ach").unwrap(), vec![4u8; 8]);
    }

    #[tokio::test]
    async fn test_failed_listing_through_shared_trait_object() {
        let remote = MockRemote::new();
        remote.add_file("inbound/ppd.ach", b"101 ppd".to_vec());
        let agent: Arc<dyn Agent> = Arc::new(connected(&remote, "listing-fail.local:22").await);

        let task = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.get_reconciliation_files().await })
        };
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_not_found(), "{}", err);
        assert_eq!(agent_up(Protocol::Mock, "listing-fail.local:22"), Some(0));

        // the dropped session is replaced on the next call
        let files = tokio::spawn(async move { agent.get_inbound_files().await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(remote.connects(), 2);
        assert_eq!(agent_up(Protocol::Mock, "listing-fail.local:22"), Some(1));
    }
}
