//! SSH handshake and authentication for SFTP agents

use std::sync::{Arc, Once};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PrivateKey, PublicKey, PublicKeyBase64};
use russh::Disconnect;
use russh_sftp::client::SftpSession as RusshSftpSession;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::PROTOCOL;
use crate::config::SftpConfig;
use crate::transfer::error::TransferError;

static INSECURE_HOST_KEY_WARNING: Once = Once::new();

/// Failures raised from inside the russh event loop
#[derive(Error, Debug)]
pub enum SshError {
    #[error("host key mismatch for {hostname}: expected {expected}, got {actual}")]
    HostKeyMismatch {
        hostname: String,
        expected: String,
        actual: String,
    },

    #[error("ssh protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

/// Server key pinned from an authorized_keys style line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedKey {
    pub key_type: Option<String>,
    pub key_data: String,
}

impl PinnedKey {
    /// Accepts `<type> <base64> [comment]` or a bare base64 blob
    pub fn parse(line: &str) -> Result<Self, TransferError> {
        let mut fields = line.split_whitespace();
        let (key_type, key_data) = match (fields.next(), fields.next()) {
            (Some(kind), Some(data)) => (Some(kind.to_string()), data.to_string()),
            (Some(data), None) => (None, data.to_string()),
            _ => return Err(TransferError::config(PROTOCOL, "empty host public key")),
        };

        let parsed = russh::keys::parse_public_key_base64(&key_data).map_err(|e| {
            TransferError::config(PROTOCOL, format!("unable to parse host public key: {}", e))
        })?;
        debug!("pinned host key {}", fingerprint(&parsed));

        Ok(Self { key_type, key_data })
    }

    fn matches(&self, key: &PublicKey) -> bool {
        BASE64.encode(key.public_key_bytes()) == self.key_data
    }
}

pub fn fingerprint(key: &PublicKey) -> String {
    let hash = Sha256::digest(key.public_key_bytes());
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

/// Parse a client key that is either base64 wrapped or raw PEM/OpenSSH text
pub fn read_signer(raw: &str) -> Result<PrivateKey, TransferError> {
    let raw = raw.trim();
    if let Ok(decoded) = BASE64.decode(raw) {
        if let Ok(text) = String::from_utf8(decoded) {
            if let Ok(key) = russh::keys::decode_secret_key(&text, None) {
                return Ok(key);
            }
        }
    }
    russh::keys::decode_secret_key(raw, None).map_err(|e| {
        TransferError::config(PROTOCOL, format!("unable to parse client private key: {}", e))
    })
}

pub struct ClientHandler {
    hostname: String,
    pinned: Option<PinnedKey>,
}

impl ClientHandler {
    pub fn new(hostname: String, pinned: Option<PinnedKey>) -> Self {
        Self { hostname, pinned }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let Some(pinned) = &self.pinned else {
            INSECURE_HOST_KEY_WARNING.call_once(|| {
                warn!(
                    "sftp: no host public key configured, accepting any server key (first seen on {})",
                    self.hostname
                );
            });
            return Ok(true);
        };

        if pinned.matches(server_public_key) {
            debug!("sftp: host key verified for {}", self.hostname);
            return Ok(true);
        }

        let expected = russh::keys::parse_public_key_base64(&pinned.key_data)
            .map(|k| fingerprint(&k))
            .unwrap_or_else(|_| pinned.key_data.clone());
        let actual = fingerprint(server_public_key);
        warn!(
            "sftp: host key for {} does not match the pinned key (expected {}, got {})",
            self.hostname, expected, actual
        );
        Err(SshError::HostKeyMismatch {
            hostname: self.hostname.clone(),
            expected,
            actual,
        })
    }
}

pub enum Credentials {
    Password(String),
    Key(Arc<PrivateKey>),
}

/// An authenticated SSH connection with an SFTP subsystem on top
pub struct Connection {
    pub handle: client::Handle<ClientHandler>,
    pub sftp: RusshSftpSession,
}

impl Connection {
    pub async fn open(
        cfg: &SftpConfig,
        host: &str,
        port: u16,
        pinned: Option<PinnedKey>,
        credentials: &Credentials,
    ) -> Result<Self, TransferError> {
        let ssh_config = client::Config {
            inactivity_timeout: None,
            ..Default::default()
        };
        let handler = ClientHandler::new(cfg.hostname.clone(), pinned);

        let timeout = cfg.dial_timeout();
        let mut handle = tokio::time::timeout(
            timeout,
            client::connect(Arc::new(ssh_config), (host, port), handler),
        )
        .await
        .map_err(|_| {
            TransferError::connection(PROTOCOL, format!("dial {} timed out after {:?}", cfg.hostname, timeout))
        })?
        .map_err(|e| TransferError::connection(PROTOCOL, format!("dial {}: {}", cfg.hostname, e)))?;

        debug!("sftp: handshake with {} completed", cfg.hostname);

        let authenticated = match credentials {
            Credentials::Password(password) => handle
                .authenticate_password(&cfg.username, password)
                .await
                .map_err(|e| TransferError::auth(PROTOCOL, e))?,
            Credentials::Key(key) => handle
                .authenticate_publickey(
                    &cfg.username,
                    PrivateKeyWithHashAlg::new(key.clone(), None),
                )
                .await
                .map_err(|e| TransferError::auth(PROTOCOL, e))?,
        };
        if !authenticated.success() {
            return Err(TransferError::auth(
                PROTOCOL,
                format!("{} rejected credentials for {}", cfg.hostname, cfg.username),
            ));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| TransferError::connection(PROTOCOL, format!("open channel: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| TransferError::connection(PROTOCOL, format!("request subsystem: {}", e)))?;
        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| TransferError::connection(PROTOCOL, format!("start sftp: {}", e)))?;

        info!("sftp: connected to {} as {}", cfg.hostname, cfg.username);
        Ok(Self { handle, sftp })
    }

    pub async fn disconnect(&self) -> Result<(), TransferError> {
        if let Err(e) = self.sftp.close().await {
            debug!("sftp: closing subsystem: {}", e);
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| TransferError::connection(PROTOCOL, e))
    }
}
