//! Runtime configuration.
//!
//! ```toml
//! storage_path = "/home/me/.storyboard/store.json"
//! sync_debounce_ms = 800
//!
//! [kdf]
//! memory_kib = 19456
//! iterations = 2
//! parallelism = 1
//! ```
//!
//! Every field is optional. Environment variables override the file:
//! `STORYBOARD_STORAGE_PATH` and `STORYBOARD_SYNC_DEBOUNCE_MS`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::KdfParams;
use crate::error::{Error, Result};

/// Env var naming the key-value store file
pub const ENV_STORAGE_PATH: &str = "STORYBOARD_STORAGE_PATH";

/// Env var overriding the sync debounce window
pub const ENV_SYNC_DEBOUNCE_MS: &str = "STORYBOARD_SYNC_DEBOUNCE_MS";

/// Configuration for [`PersistCore`](crate::PersistCore)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// File for the key-value store; `None` keeps everything in memory
    pub storage_path: Option<PathBuf>,

    /// Quiet period before queued patches are sent
    pub sync_debounce_ms: u64,

    /// Password stretching cost
    pub kdf: KdfParams,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            sync_debounce_ms: 800,
            kdf: KdfParams::default(),
        }
    }
}

impl PersistConfig {
    /// Parse from TOML
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of `self`
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = var(ENV_STORAGE_PATH).filter(|p| !p.trim().is_empty()) {
            self.storage_path = Some(PathBuf::from(path));
        }

        if let Some(ms) = var(ENV_SYNC_DEBOUNCE_MS) {
            self.sync_debounce_ms = ms.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("{} must be a whole number of ms, got {:?}", ENV_SYNC_DEBOUNCE_MS, ms))
            })?;
        }

        Ok(self)
    }

    /// Debounce window as a `Duration`
    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }
}
