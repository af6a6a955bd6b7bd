//! Transfer error types

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;

/// Remote file protocol an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ftp,
    Sftp,
    /// In-memory remote used in tests
    #[cfg(any(test, feature = "mock"))]
    Mock,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::Sftp => "sftp",
            #[cfg(any(test, feature = "mock"))]
            Protocol::Mock => "mock",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    /// Missing or contradictory settings, disallowed hosts. Never retried.
    #[error("{protocol}: invalid configuration: {message}")]
    Config { protocol: Protocol, message: String },

    #[error("{protocol}: connection failed: {message}")]
    ConnectionFailed { protocol: Protocol, message: String },

    #[error("{protocol}: authentication failed: {message}")]
    AuthenticationFailed { protocol: Protocol, message: String },

    #[error("{protocol}: {path} not found")]
    NotFound { protocol: Protocol, path: String },

    /// A remote operation failed, `op` names it (e.g. "readdir", "stat")
    #[error("{protocol}: {op} {path} failed: {message}")]
    Operation {
        protocol: Protocol,
        op: &'static str,
        path: String,
        message: String,
    },

    #[error("{protocol}: {op} {path}: {source}")]
    Io {
        protocol: Protocol,
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl TransferError {
    pub fn config(protocol: Protocol, message: impl Into<String>) -> Self {
        TransferError::Config {
            protocol,
            message: message.into(),
        }
    }

    pub fn connection(protocol: Protocol, message: impl fmt::Display) -> Self {
        TransferError::ConnectionFailed {
            protocol,
            message: message.to_string(),
        }
    }

    pub fn auth(protocol: Protocol, message: impl fmt::Display) -> Self {
        TransferError::AuthenticationFailed {
            protocol,
            message: message.to_string(),
        }
    }

    pub fn op(
        protocol: Protocol,
        op: &'static str,
        path: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        TransferError::Operation {
            protocol,
            op,
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn io(
        protocol: Protocol,
        op: &'static str,
        path: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        TransferError::Io {
            protocol,
            op,
            path: path.into(),
            source,
        }
    }

    pub fn not_found(protocol: Protocol, path: impl Into<String>) -> Self {
        TransferError::NotFound {
            protocol,
            path: path.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound { .. })
    }

    /// Configuration errors are fatal and must not be retried
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            TransferError::Config { .. } | TransferError::InvalidConfig(_)
        )
    }

    pub fn protocol(&self) -> Option<Protocol> {
        match self {
            TransferError::Config { protocol, .. }
            | TransferError::ConnectionFailed { protocol, .. }
            | TransferError::AuthenticationFailed { protocol, .. }
            | TransferError::NotFound { protocol, .. }
            | TransferError::Operation { protocol, .. }
            | TransferError::Io { protocol, .. } => Some(*protocol),
            TransferError::InvalidConfig(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_error_names_protocol_and_op() {
        let err = TransferError::op(Protocol::Sftp, "readdir", "inbound", "broken pipe");
        assert_eq!(err.to_string(), "sftp: readdir inbound failed: broken pipe");
        assert_eq!(err.protocol(), Some(Protocol::Sftp));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_and_config_predicates() {
        assert!(TransferError::not_found(Protocol::Ftp, "/missing.txt").is_not_found());
        assert!(TransferError::config(Protocol::Ftp, "no hostname").is_config());
        assert!(!TransferError::connection(Protocol::Ftp, "refused").is_config());
    }
}
