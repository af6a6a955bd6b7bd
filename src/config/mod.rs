//! Configuration Management Module
//!
//! Agent definitions (FTP / SFTP targets, remote paths, allow-listed IPs) and
//! the JSON file they are loaded from.

pub mod storage;
pub mod types;

pub use storage::{load_from_file, ConfigStorage, StorageError};
pub use types::{
    mask_password, AgentConfig, AgentPaths, ConfigError, ConfigFile, FtpConfig, IngestionConfig,
    SftpConfig, CONFIG_VERSION,
};
