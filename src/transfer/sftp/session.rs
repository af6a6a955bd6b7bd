//! SFTP implementation of the remote session primitives

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::protocol::{FileAttributes, OpenFlags, Status, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::client::Connection;
use super::PROTOCOL;
use crate::transfer::connector::{RemoteEntry, RemoteSession};
use crate::transfer::error::TransferError;
use crate::transfer::path_utils::{base_name, join_remote_path};

/// Permission applied to every uploaded file
const UPLOAD_MODE: u32 = 0o600;

fn is_no_such_file(err: &SftpErrorInner) -> bool {
    matches!(
        err,
        SftpErrorInner::Status(Status {
            status_code: StatusCode::NoSuchFile,
            ..
        })
    )
}

/// fsync is an OpenSSH extension, servers without it report one of these
fn is_unsupported(err: &SftpErrorInner) -> bool {
    matches!(
        err,
        SftpErrorInner::Status(Status {
            status_code: StatusCode::OpUnsupported,
            ..
        })
    ) || err.to_string().to_lowercase().contains("not supported")
}

fn map_sftp_error(op: &'static str, path: &str, err: SftpErrorInner) -> TransferError {
    if is_no_such_file(&err) {
        TransferError::not_found(PROTOCOL, path)
    } else {
        TransferError::op(PROTOCOL, op, path, err)
    }
}

/// Relative paths resolve against the login directory
fn remote_path(path: &str) -> &str {
    if path.is_empty() {
        "."
    } else {
        path
    }
}

/// Errors some servers raise at the end of an otherwise complete read
fn is_benign_read_tail(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::UnexpectedEof
        || err.to_string().to_lowercase().contains("internal inconsistency")
}

pub struct SftpSession {
    conn: Connection,
    packet_size: usize,
}

impl SftpSession {
    pub fn new(conn: Connection, packet_size: usize) -> Self {
        Self {
            conn,
            packet_size: packet_size.max(1),
        }
    }

    /// Open, copy, sync, chmod and close. Every step runs; the first error wins.
    async fn upload(&mut self, path: &str, contents: &[u8]) -> Result<(), TransferError> {
        let mut file = self
            .conn
            .sftp
            .open_with_flags(path, OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE)
            .await
            .map_err(|e| map_sftp_error("create", path, e))?;

        let mut first_error: Option<TransferError> = None;

        for chunk in contents.chunks(self.packet_size) {
            if let Err(e) = file.write_all(chunk).await {
                first_error = Some(TransferError::io(PROTOCOL, "write", path, e));
                break;
            }
        }
        if let Err(e) = file.flush().await {
            first_error.get_or_insert(TransferError::io(PROTOCOL, "flush", path, e));
        }

        match file.sync_all().await {
            Ok(()) => {}
            Err(e) if is_unsupported(&e) => {
                debug!("sftp: server does not support fsync for {}", path);
            }
            Err(e) => {
                first_error.get_or_insert(TransferError::op(PROTOCOL, "sync", path, e));
            }
        }

        let attrs = FileAttributes {
            permissions: Some(UPLOAD_MODE),
            ..FileAttributes::empty()
        };
        if let Err(e) = self.conn.sftp.set_metadata(path, attrs).await {
            first_error.get_or_insert(TransferError::op(PROTOCOL, "chmod", path, e));
        }

        if let Err(e) = file.shutdown().await {
            first_error.get_or_insert(TransferError::io(PROTOCOL, "close", path, e));
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteSession for SftpSession {
    async fn check_alive(&mut self) -> Result<(), TransferError> {
        self.conn
            .sftp
            .canonicalize(".")
            .await
            .map(|_| ())
            .map_err(|e| TransferError::connection(PROTOCOL, e))
    }

    async fn read_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let path = remote_path(dir);
        let entries = self
            .conn
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| map_sftp_error("readdir", dir, e))?;

        Ok(entries
            .filter_map(|entry| {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    return None;
                }
                Some(RemoteEntry {
                    is_dir: entry.file_type().is_dir(),
                    name,
                })
            })
            .collect())
    }

    async fn read_file(&mut self, path: &str) -> Result<Vec<u8>, TransferError> {
        let mut file = self
            .conn
            .sftp
            .open(path)
            .await
            .map_err(|e| map_sftp_error("open", path, e))?;

        let mut contents = Vec::new();
        let mut chunk = vec![0u8; self.packet_size];
        loop {
            match file.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => contents.extend_from_slice(&chunk[..n]),
                Err(e) if !contents.is_empty() && is_benign_read_tail(&e) => {
                    warn!(
                        "sftp: ignoring read error after {} bytes of {}: {}",
                        contents.len(),
                        path,
                        e
                    );
                    break;
                }
                Err(e) => return Err(TransferError::io(PROTOCOL, "read", path, e)),
            }
        }

        if let Err(e) = file.shutdown().await {
            debug!("sftp: closing {}: {}", path, e);
        }
        Ok(contents)
    }

    async fn stat(&mut self, path: &str) -> Result<Option<RemoteEntry>, TransferError> {
        match self.conn.sftp.metadata(remote_path(path)).await {
            Ok(meta) => Ok(Some(RemoteEntry {
                name: base_name(path).to_string(),
                is_dir: meta.is_dir(),
            })),
            Err(e) if is_no_such_file(&e) => Ok(None),
            Err(e) => Err(TransferError::op(PROTOCOL, "stat", path, e)),
        }
    }

    async fn create_dir(&mut self, path: &str) -> Result<(), TransferError> {
        self.conn
            .sftp
            .create_dir(path)
            .await
            .map_err(|e| TransferError::op(PROTOCOL, "mkdir", path, e))
    }

    async fn write_file(
        &mut self,
        dir: &str,
        name: &str,
        contents: &[u8],
    ) -> Result<(), TransferError> {
        let path = join_remote_path(dir, name);
        self.upload(&path, contents).await
    }

    async fn remove_file(&mut self, path: &str) -> Result<(), TransferError> {
        self.conn
            .sftp
            .remove_file(path)
            .await
            .map_err(|e| map_sftp_error("remove", path, e))
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        self.conn.disconnect().await
    }
}
