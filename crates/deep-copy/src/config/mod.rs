//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::bridge::{BridgeStore, FileBridgeStore, MemoryBridgeStore};
use crate::error::{CopyError, Result};
use crate::keymap::{CopyKey, FileKeyMapStore, KeyMapStore, NoOpKeyMapStore, PgKeyMapStore};
use crate::store::connect_pool;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration, recorded with each run.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl KeyMapConfig {
    /// Build the configured key map backend.
    pub async fn open<K: CopyKey>(&self) -> Result<Arc<dyn KeyMapStore<K>>> {
        self.open_backend(false).await
    }

    /// Build the configured backend for inspection only. Initializing and
    /// loading it never creates, repairs or writes anything, so it is safe
    /// alongside a run that is still appending.
    pub async fn open_read_only<K: CopyKey>(&self) -> Result<Arc<dyn KeyMapStore<K>>> {
        self.open_backend(true).await
    }

    async fn open_backend<K: CopyKey>(&self, read_only: bool) -> Result<Arc<dyn KeyMapStore<K>>> {
        match self.backend {
            KeyMapBackend::Memory => Ok(Arc::new(NoOpKeyMapStore::new())),
            KeyMapBackend::File => {
                let path = self.path.as_ref().ok_or_else(|| {
                    CopyError::Config("key_map.path is required for the file backend".into())
                })?;
                if read_only {
                    Ok(Arc::new(FileKeyMapStore::read_only(path)))
                } else {
                    Ok(Arc::new(FileKeyMapStore::new(path)))
                }
            }
            KeyMapBackend::Postgres => {
                let pg = self.postgres.as_ref().ok_or_else(|| {
                    CopyError::Config(
                        "key_map.postgres is required for the postgres backend".into(),
                    )
                })?;
                let pool = connect_pool(pg).await?;
                if read_only {
                    Ok(Arc::new(PgKeyMapStore::read_only(pool, &pg.schema)))
                } else {
                    Ok(Arc::new(PgKeyMapStore::new(pool, &pg.schema)))
                }
            }
        }
    }
}

impl BridgeConfig {
    /// Build the configured bridge store.
    pub fn open(&self) -> Result<Arc<dyn BridgeStore>> {
        match self.backend {
            BridgeBackend::Memory => Ok(Arc::new(MemoryBridgeStore::new())),
            BridgeBackend::File => {
                let path = self.path.as_ref().ok_or_else(|| {
                    CopyError::Config("bridge.path is required for the file backend".into())
                })?;
                Ok(Arc::new(FileBridgeStore::new(path)))
            }
        }
    }
}
