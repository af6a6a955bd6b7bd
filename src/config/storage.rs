//! Configuration Storage
//!
//! Reads and writes agent configuration files (JSON) on disk.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::{ConfigError, ConfigFile, CONFIG_VERSION};

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Load and validate a config file
pub async fn load_from_file(path: impl AsRef<Path>) -> Result<ConfigFile, StorageError> {
    ConfigStorage::with_path(path.as_ref().to_path_buf()).load().await
}

/// Configuration storage manager
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Load configuration from disk. Missing or corrupt files are errors.
    pub async fn load(&self) -> Result<ConfigFile, StorageError> {
        let contents = fs::read_to_string(&self.path).await?;
        let config: ConfigFile = serde_json::from_str(&contents)?;

        if config.version > CONFIG_VERSION {
            return Err(StorageError::VersionTooNew {
                found: config.version,
                supported: CONFIG_VERSION,
            });
        }
        for agent in &config.agents {
            agent.validate()?;
        }

        tracing::debug!(
            "Loaded {} agent config(s) from {}",
            config.agents.len(),
            self.path.display()
        );
        Ok(config)
    }

    /// Save configuration to disk
    pub async fn save(&self, config: &ConfigFile) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        // Write to temp file first, then rename (atomic write)
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(config)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, FtpConfig};
    use tempfile::tempdir;

    fn ftp_agent(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            ftp: Some(FtpConfig {
                hostname: "ftp.bank.com:21".to_string(),
                username: "user".to_string(),
                password: "pass".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("missing.json"));
        assert!(matches!(storage.load().await, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("agents.json");
        let storage = ConfigStorage::with_path(path.clone());

        let mut config = ConfigFile::default();
        config.agents.push(ftp_agent("bank-a"));
        storage.save(&config).await.unwrap();

        let loaded = load_from_file(&path).await.unwrap();
        assert_eq!(loaded.agents.len(), 1);
        assert_eq!(loaded.agents[0].id, "bank-a");
        assert_eq!(loaded.agents[0].hostname(), "ftp.bank.com:21");
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_agent() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("agents.json"));

        let mut config = ConfigFile::default();
        config.agents.push(ftp_agent(""));
        storage.save(&config).await.unwrap();

        assert!(matches!(storage.load().await, Err(StorageError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_newer_version() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("agents.json");
        fs::write(&path, r#"{"version": 99, "agents": []}"#)
            .await
            .unwrap();

        let err = load_from_file(&path).await.unwrap_err();
        assert!(matches!(err, StorageError::VersionTooNew { found: 99, .. }));
    }
}
