//! Store configuration
//!
//! Settings are read, in order of priority, from:
//! 1. An explicit JSON file
//! 2. `store.json` in the Satchel config directory
//! 3. Environment variables (`SATCHEL_DB`, `SATCHEL_ATTACHMENTS_DIR`)
//! 4. Defaults (`attachments.sqlite` in the config directory)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::storage::{CHUNK_SIZE, ContentStore};

/// Config filename in the Satchel config directory
pub const STORE_CONFIG_FILE: &str = "store.json";

/// Default database filename
pub const DEFAULT_DATABASE_FILE: &str = "attachments.sqlite";

const DB_ENV: &str = "SATCHEL_DB";
const ATTACHMENTS_DIR_ENV: &str = "SATCHEL_ATTACHMENTS_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding metadata and content
    pub database_path: PathBuf,
    /// Where temporary copies of attachments are written for viewers
    pub attachments_directory: Option<PathBuf>,
    /// Transfer unit for imports and chunked reads
    pub chunk_size: usize,
    /// Viewer configuration name
    pub conf_name: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            attachments_directory: None,
            chunk_size: CHUNK_SIZE,
            conf_name: None,
        }
    }
}

fn default_database_path() -> PathBuf {
    config::config_path(DEFAULT_DATABASE_FILE).unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_FILE))
}

impl StoreConfig {
    /// Load configuration, preferring `explicit` when given
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let source = config::locate(explicit, STORE_CONFIG_FILE);
        match config::load::<StoreConfig>(&source)? {
            Some(cfg) => {
                log::debug!("[STORE] Configuration from {:?}", source);
                cfg.validated()
            }
            None => Ok(Self::from_env()),
        }
    }

    /// Load configuration from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let cfg: StoreConfig = config::load_json_file(path)?;
        cfg.validated()
    }

    /// Defaults overridden by whichever environment variables are set
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(db) = config::env_path(DB_ENV) {
            cfg.database_path = db;
        }
        if let Some(dir) = config::env_path(ATTACHMENTS_DIR_ENV) {
            cfg.attachments_directory = Some(dir);
        }
        cfg
    }

    fn validated(self) -> Result<Self> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        Ok(self)
    }

    /// Write this configuration to the config directory
    pub fn save(&self) -> Result<PathBuf> {
        config::save_json(STORE_CONFIG_FILE, self)
    }

    /// Open the content store this configuration describes, creating the
    /// database's parent directory if needed
    pub fn open_store(&self) -> Result<ContentStore> {
        config::ensure_parent(&self.database_path)?;
        let store = ContentStore::open_path(&self.database_path)
            .with_context(|| format!("Failed to open store: {}", self.database_path.display()))?;
        Ok(store.with_chunk_size(self.chunk_size))
    }
}
