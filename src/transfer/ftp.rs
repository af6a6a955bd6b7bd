//! FTP connector
//!
//! Plain FTP, or explicit TLS (`AUTH TLS`) when the agent configures a CA
//! bundle. suppaftp is a blocking client, so every command runs on the
//! blocking pool while the agent lock is held.

use std::io::Cursor;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use native_tls::{Certificate, TlsConnector};
use suppaftp::list::File as ListEntry;
use suppaftp::types::FileType;
use suppaftp::{FtpError, Mode, NativeTlsConnector, NativeTlsFtpStream, Status};
use tracing::{debug, info, warn};

use super::agent::TransferAgent;
use super::connector::{Connector, RemoteEntry, RemoteSession};
use super::error::{Protocol, TransferError};
use super::path_utils::{join_remote_path, parse_host_port};
use crate::config::FtpConfig;

const PROTOCOL: Protocol = Protocol::Ftp;
const DEFAULT_PORT: u16 = 21;

pub type FtpAgent = TransferAgent<FtpConnector>;

pub struct FtpConnector {
    cfg: FtpConfig,
    host: String,
    port: u16,
    tls: Option<TlsConnector>,
}

impl FtpConnector {
    /// Validate the endpoint and load the CA bundle, without dialing
    pub fn new(cfg: FtpConfig) -> Result<Self, TransferError> {
        let (host, port) = parse_host_port(&cfg.hostname, DEFAULT_PORT)
            .map_err(|e| TransferError::config(PROTOCOL, e))?;

        let tls = match &cfg.ca_file {
            Some(path) => {
                let mut builder = TlsConnector::builder();
                for cert in load_ca_bundle(path)? {
                    builder.add_root_certificate(cert);
                }
                let connector = builder
                    .build()
                    .map_err(|e| TransferError::config(PROTOCOL, format!("tls setup: {}", e)))?;
                Some(connector)
            }
            None => None,
        };

        Ok(Self {
            cfg,
            host,
            port,
            tls,
        })
    }

    pub fn config(&self) -> &FtpConfig {
        &self.cfg
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }
}

/// Every certificate in a PEM bundle, in file order
fn load_ca_bundle(path: &Path) -> Result<Vec<Certificate>, TransferError> {
    let pem = std::fs::read(path).map_err(|e| {
        TransferError::config(PROTOCOL, format!("reading CA file {}: {}", path.display(), e))
    })?;
    let certs = Certificate::stack_from_pem(&pem).map_err(|e| {
        TransferError::config(PROTOCOL, format!("parsing CA file {}: {}", path.display(), e))
    })?;
    if certs.is_empty() {
        return Err(TransferError::config(
            PROTOCOL,
            format!("CA file {} holds no certificates", path.display()),
        ));
    }
    debug!("ftp: loaded {} CA certificate(s) from {}", certs.len(), path.display());
    Ok(certs)
}

#[async_trait]
impl Connector for FtpConnector {
    type Session = FtpSession;

    fn protocol(&self) -> Protocol {
        PROTOCOL
    }

    fn hostname(&self) -> &str {
        &self.cfg.hostname
    }

    async fn connect(&self) -> Result<FtpSession, TransferError> {
        let host = self.host.clone();
        let port = self.port;
        let timeout = self.cfg.dial_timeout();
        let username = self.cfg.username.clone();
        let password = self.cfg.password.clone();
        let mode = if self.cfg.disabled_epsv {
            Mode::Passive
        } else {
            Mode::ExtendedPassive
        };
        let tls = self.tls.clone();

        let (stream, home) = tokio::task::spawn_blocking(move || {
            let mut stream = dial(&host, port, timeout)?;
            if let Some(tls) = tls {
                stream = stream
                    .into_secure(NativeTlsConnector::from(tls), &host)
                    .map_err(|e| TransferError::connection(PROTOCOL, format!("tls: {}", e)))?;
            }
            stream.set_mode(mode);
            stream
                .login(&username, &password)
                .map_err(|e| TransferError::auth(PROTOCOL, e))?;
            stream
                .transfer_type(FileType::Binary)
                .map_err(|e| TransferError::connection(PROTOCOL, e))?;
            let home = stream
                .pwd()
                .map_err(|e| TransferError::connection(PROTOCOL, e))?;
            Ok::<_, TransferError>((stream, home))
        })
        .await
        .map_err(|e| TransferError::connection(PROTOCOL, e))??;

        info!("ftp: logged in to {} (home {})", self.cfg.hostname, home);
        Ok(FtpSession {
            stream: Some(stream),
            home,
        })
    }
}

fn dial(host: &str, port: u16, timeout: Duration) -> Result<NativeTlsFtpStream, TransferError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransferError::connection(PROTOCOL, format!("resolving {}: {}", host, e)))?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        match NativeTlsFtpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("ftp: dial {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) => TransferError::connection(PROTOCOL, e),
        None => TransferError::connection(PROTOCOL, format!("{} has no addresses", host)),
    })
}

fn is_unavailable(e: &FtpError) -> bool {
    matches!(e, FtpError::UnexpectedResponse(resp) if resp.status == Status::FileUnavailable)
}

fn op_error(op: &'static str, path: &str, e: FtpError) -> TransferError {
    if is_unavailable(&e) {
        TransferError::not_found(PROTOCOL, path)
    } else {
        TransferError::op(PROTOCOL, op, path, e)
    }
}

/// `CWD` into `dir`, treating an empty path or `.` as the login directory
fn change_dir(stream: &mut NativeTlsFtpStream, home: &str, dir: &str) -> Result<(), TransferError> {
    stream
        .cwd(home)
        .map_err(|e| TransferError::op(PROTOCOL, "cwd", home, e))?;
    if dir.is_empty() || dir == "." {
        return Ok(());
    }
    stream.cwd(dir).map_err(|e| op_error("cwd", dir, e))
}

/// Entries from `LIST` output (Unix or DOS style), without `.` and `..`
fn parse_list(lines: Vec<String>) -> Vec<RemoteEntry> {
    let mut entries = Vec::with_capacity(lines.len());
    for line in lines {
        match line.parse::<ListEntry>() {
            Ok(entry) if entry.name() == "." || entry.name() == ".." => {}
            Ok(entry) => entries.push(RemoteEntry {
                name: entry.name().to_string(),
                is_dir: entry.is_directory(),
            }),
            Err(e) => warn!("ftp: skipping unparsable LIST line {:?}: {}", line, e),
        }
    }
    entries
}

fn is_not_implemented(e: &FtpError) -> bool {
    matches!(e, FtpError::UnexpectedResponse(resp) if resp.status == Status::CommandNotImplemented)
}

/// Directory to `LIST` when looking up `path`; `None` is the working directory
fn parent_dir(path: &str) -> Option<&str> {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

/// Entry named like the last component of `path` in a parent listing
fn find_listed(lines: Vec<String>, path: &str) -> Option<RemoteEntry> {
    let name = super::path_utils::base_name(path);
    parse_list(lines).into_iter().find(|e| e.name == name)
}

/// Look `path` up in a listing of its parent, for servers without `SIZE`
fn stat_by_listing(
    stream: &mut NativeTlsFtpStream,
    path: &str,
) -> Result<Option<RemoteEntry>, TransferError> {
    match stream.list(parent_dir(path)) {
        Ok(lines) => Ok(find_listed(lines, path)),
        Err(e) if is_unavailable(&e) => Ok(None),
        Err(e) => Err(TransferError::op(PROTOCOL, "list", path, e)),
    }
}

pub struct FtpSession {
    /// `None` only while a command is running on the blocking pool
    stream: Option<NativeTlsFtpStream>,
    home: String,
}

impl FtpSession {
    /// Run `f` against the control connection on the blocking pool
    async fn run<T, F>(&mut self, f: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&mut NativeTlsFtpStream, &str) -> Result<T, TransferError> + Send + 'static,
    {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| TransferError::connection(PROTOCOL, "connection lost"))?;
        let home = self.home.clone();

        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut stream, &home);
            (stream, result)
        })
        .await
        .map_err(|e| TransferError::connection(PROTOCOL, e))?;

        self.stream = Some(stream);
        result
    }
}

#[async_trait]
impl RemoteSession for FtpSession {
    async fn check_alive(&mut self) -> Result<(), TransferError> {
        self.run(|stream, _| {
            stream
                .noop()
                .map_err(|e| TransferError::connection(PROTOCOL, e))
        })
        .await
    }

    async fn read_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let dir = dir.to_string();
        self.run(move |stream, home| {
            change_dir(stream, home, &dir)?;
            let lines = stream
                .list(None)
                .map_err(|e| op_error("list", &dir, e))?;
            Ok(parse_list(lines))
        })
        .await
    }

    async fn read_file(&mut self, path: &str) -> Result<Vec<u8>, TransferError> {
        let path = path.to_string();
        self.run(move |stream, home| {
            stream
                .cwd(home)
                .map_err(|e| TransferError::op(PROTOCOL, "cwd", home, e))?;
            let buf = stream
                .retr_as_buffer(&path)
                .map_err(|e| op_error("retr", &path, e))?;
            Ok(buf.into_inner())
        })
        .await
    }

    async fn stat(&mut self, path: &str) -> Result<Option<RemoteEntry>, TransferError> {
        let path = path.to_string();
        self.run(move |stream, home| {
            let name = super::path_utils::base_name(&path).to_string();
            stream
                .cwd(home)
                .map_err(|e| TransferError::op(PROTOCOL, "cwd", home, e))?;

            // A directory is anything we can change into
            if stream.cwd(&path).is_ok() {
                stream
                    .cwd(home)
                    .map_err(|e| TransferError::op(PROTOCOL, "cwd", home, e))?;
                return Ok(Some(RemoteEntry::dir(name)));
            }
            match stream.size(&path) {
                Ok(_) => Ok(Some(RemoteEntry::file(name))),
                Err(e) if is_unavailable(&e) => Ok(None),
                Err(e) if is_not_implemented(&e) => {
                    debug!("ftp: SIZE unsupported, listing parent of {}", path);
                    stat_by_listing(stream, &path)
                }
                Err(e) => Err(TransferError::op(PROTOCOL, "size", path.as_str(), e)),
            }
        })
        .await
    }

    async fn create_dir(&mut self, path: &str) -> Result<(), TransferError> {
        let path = path.to_string();
        self.run(move |stream, home| {
            stream
                .cwd(home)
                .map_err(|e| TransferError::op(PROTOCOL, "cwd", home, e))?;
            stream
                .mkdir(&path)
                .map_err(|e| TransferError::op(PROTOCOL, "mkdir", path.as_str(), e))
        })
        .await
    }

    async fn write_file(
        &mut self,
        dir: &str,
        name: &str,
        contents: &[u8],
    ) -> Result<(), TransferError> {
        let dir = dir.to_string();
        let name = name.to_string();
        let contents = contents.to_vec();
        self.run(move |stream, home| {
            change_dir(stream, home, &dir)?;
            let mut reader = Cursor::new(contents);
            let written = stream
                .put_file(&name, &mut reader)
                .map_err(|e| TransferError::op(PROTOCOL, "stor", join_remote_path(&dir, &name), e))?;
            debug!("ftp: stored {} bytes as {}", written, join_remote_path(&dir, &name));
            Ok(())
        })
        .await
    }

    async fn remove_file(&mut self, path: &str) -> Result<(), TransferError> {
        let path = path.to_string();
        self.run(move |stream, home| {
            stream
                .cwd(home)
                .map_err(|e| TransferError::op(PROTOCOL, "cwd", home, e))?;
            stream.rm(&path).map_err(|e| op_error("dele", &path, e))
        })
        .await
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || stream.quit())
            .await
            .map_err(|e| TransferError::connection(PROTOCOL, e))?
            .map_err(|e| TransferError::op(PROTOCOL, "quit", "", e))
    }
}
