//! SFTP connector
//!
//! Password or public key authentication over russh, with the server key
//! pinned when the agent configures one.

pub mod client;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;

pub use client::{read_signer, PinnedKey};
pub use session::SftpSession;

use client::{Connection, Credentials};

use super::agent::TransferAgent;
use super::connector::Connector;
use super::error::{Protocol, TransferError};
use super::path_utils::parse_host_port;
use crate::config::SftpConfig;

pub(crate) const PROTOCOL: Protocol = Protocol::Sftp;
const DEFAULT_PORT: u16 = 22;
const DIAL_ATTEMPTS: u32 = 3;

pub type SftpAgent = TransferAgent<SftpConnector>;

pub struct SftpConnector {
    cfg: SftpConfig,
    host: String,
    port: u16,
    pinned: Option<PinnedKey>,
    credentials: Credentials,
}

impl SftpConnector {
    /// Validate the endpoint, credentials and pinned host key, without dialing
    pub fn new(cfg: SftpConfig) -> Result<Self, TransferError> {
        let (host, port) = parse_host_port(&cfg.hostname, DEFAULT_PORT)
            .map_err(|e| TransferError::config(PROTOCOL, e))?;

        let credentials = match (cfg.password.is_empty(), cfg.client_private_key.is_empty()) {
            (false, true) => Credentials::Password(cfg.password.clone()),
            (true, false) => Credentials::Key(Arc::new(read_signer(&cfg.client_private_key)?)),
            (false, false) => {
                return Err(TransferError::config(
                    PROTOCOL,
                    "password and client private key are mutually exclusive",
                ))
            }
            (true, true) => {
                return Err(TransferError::config(
                    PROTOCOL,
                    "one of password or client private key is required",
                ))
            }
        };

        let pinned = if cfg.host_public_key.trim().is_empty() {
            None
        } else {
            Some(PinnedKey::parse(&cfg.host_public_key)?)
        };

        Ok(Self {
            cfg,
            host,
            port,
            pinned,
            credentials,
        })
    }

    pub fn config(&self) -> &SftpConfig {
        &self.cfg
    }

    pub fn is_host_key_pinned(&self) -> bool {
        self.pinned.is_some()
    }
}

#[async_trait]
impl Connector for SftpConnector {
    type Session = SftpSession;

    fn protocol(&self) -> Protocol {
        PROTOCOL
    }

    fn hostname(&self) -> &str {
        &self.cfg.hostname
    }

    fn dial_attempts(&self) -> u32 {
        DIAL_ATTEMPTS
    }

    fn create_outbound_dir(&self) -> bool {
        !self.cfg.skip_directory_creation
    }

    async fn connect(&self) -> Result<SftpSession, TransferError> {
        let conn = Connection::open(
            &self.cfg,
            &self.host,
            self.port,
            self.pinned.clone(),
            &self.credentials,
        )
        .await?;
        Ok(SftpSession::new(conn, self.cfg.packet_size()))
    }
}
