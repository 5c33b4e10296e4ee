//! # Storyboard Persist
//!
//! Client-side persistence core for the storyboard assistant: an encrypted,
//! versioned store for provider configuration, the key lifecycle behind it,
//! and write-coalescing queues for scene edits.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      STORYBOARD PERSIST MODULES                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────┐      ┌──────────────────┐                         │
//! │  │  ProfileService  │      │  Scene queues    │                         │
//! │  │                  │      │                  │                         │
//! │  │ - CRUD profiles  │      │ - Coalesce       │                         │
//! │  │ - Bootstrap      │      │ - Debounce 800ms │                         │
//! │  │ - Test results   │      │ - Requeue-merge  │                         │
//! │  └────────┬─────────┘      └────────┬─────────┘                         │
//! │           │                         │                                   │
//! │           ▼                         ▼                                   │
//! │  ┌──────────────────┐      ┌──────────────────┐                         │
//! │  │   ConfigStore    │      │  RemoteUpdater   │  (backend, injected)    │
//! │  │                  │      └──────────────────┘                         │
//! │  │ - load / save    │                                                   │
//! │  │ - backup+migrate │                                                   │
//! │  └────────┬─────────┘                                                   │
//! │           │                                                             │
//! │  ┌────────▼─────────┐      ┌──────────────────┐                         │
//! │  │   KeyManager     │─────►│  KeyValueStore   │                         │
//! │  │                  │      │                  │                         │
//! │  │ - Argon2id       │      │ - MemoryStore    │                         │
//! │  │ - HKDF purposes  │      │ - JsonFileStore  │                         │
//! │  │ - Lock state     │      └──────────────────┘                         │
//! │  └──────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`crypto`] - Key derivation, AES-256-GCM and the envelope format
//! - [`keys`] - Master key lifecycle (default, custom, locked)
//! - [`storage`] - Key-value backends and the encrypted config store
//! - [`profiles`] - Config document types and profile operations
//! - [`sync`] - Write-coalescing patch queues
//! - [`config`] - Runtime configuration
//! - [`logging`] - Tracing subscriber setup
//!
//! ## Security Model
//!
//! The only persisted form of the config document is an `AIXS_V3:`
//! envelope. Without a custom password a built-in default key is used,
//! which obfuscates rather than protects. With one, the manager starts
//! every session LOCKED and refuses to read or write until the password
//! is supplied.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod logging;
pub mod profiles;
pub mod storage;
pub mod sync;
/// Clock helpers.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::PersistConfig;
pub use crypto::{KdfParams, KeyPurpose};
pub use error::{Error, Result};
pub use keys::{KeyInfo, KeyManager, KeyState};
pub use profiles::{ConfigDocument, ConfigProfile, ProfileService, UserConfig};
pub use storage::{ConfigStore, JsonFileStore, KeyValueStore, MemoryStore};
pub use sync::{EpisodeScenePatchQueue, Patch, PatchQueue, ScenePatchQueue};

// ============================================================================
// CORE
// ============================================================================

use std::sync::Arc;

use sync::{EpisodeSceneUpdater, SceneUpdater};

/// Everything wired together over one key-value store
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                     PERSIST CORE LIFECYCLE                              │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. open(config)                                                        │
/// │     ──► open JsonFileStore (or MemoryStore)                             │
/// │     ──► KeyManager: default key, or LOCKED if a password is set         │
/// │                                                                         │
/// │  2. if keys().state() == Locked                                         │
/// │     ──► keys().unlock(password)                                         │
/// │                                                                         │
/// │  3. profiles().load_or_bootstrap()                                      │
/// │                                                                         │
/// │  4. scene_queue(updater) / episode_scene_queue(updater)                 │
/// │     ──► enqueue edits; flush_now() on page hide / shutdown              │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct PersistCore {
    config: PersistConfig,
    storage: Arc<dyn KeyValueStore>,
    keys: Arc<KeyManager>,
    profiles: ProfileService,
}

impl PersistCore {
    /// Open the store named by `config` and set up the key manager
    pub fn open(config: PersistConfig) -> Result<Self> {
        tracing::info!("Opening storyboard persist v{}", version());

        let storage: Arc<dyn KeyValueStore> = match &config.storage_path {
            Some(path) => Arc::new(JsonFileStore::open(path)?),
            None => {
                tracing::info!("No storage path configured; using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_storage(config, storage)
    }

    /// Wire everything over an existing store
    pub fn with_storage(config: PersistConfig, storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let keys = Arc::new(KeyManager::new(storage.clone(), config.kdf)?);
        let profiles = ProfileService::new(ConfigStore::new(storage.clone(), keys.clone()));

        tracing::info!("Persist core ready ({:?})", keys.state());
        Ok(Self {
            config,
            storage,
            keys,
            profiles,
        })
    }

    /// The active configuration
    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// The underlying key-value store
    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.storage
    }

    /// The key manager
    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// The encrypted config store
    pub fn config_store(&self) -> &ConfigStore {
        self.profiles.store()
    }

    /// Profile operations
    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    /// A project scene queue using the configured debounce
    pub fn scene_queue(&self, updater: Arc<dyn SceneUpdater>) -> ScenePatchQueue {
        ScenePatchQueue::new(updater, self.config.sync_debounce())
    }

    /// An episode scene queue using the configured debounce
    pub fn episode_scene_queue(&self, updater: Arc<dyn EpisodeSceneUpdater>) -> EpisodeScenePatchQueue {
        EpisodeScenePatchQueue::new(updater, self.config.sync_debounce())
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> PersistConfig {
        PersistConfig {
            kdf: KdfParams::fast(),
            ..Default::default()
        }
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_open_in_memory() {
        let core = PersistCore::open(fast_config()).unwrap();
        assert_eq!(core.keys().state(), KeyState::Unlocked { custom: false });

        let doc = core.profiles().load_or_bootstrap().unwrap();
        assert_eq!(doc.profiles.len(), 1);
        assert!(core.config_store().has_stored_blob());
    }

    #[test]
    fn test_open_file_store_reopens_locked() {
        let dir = tempfile::tempdir().unwrap();
        let config = PersistConfig {
            storage_path: Some(dir.path().join("store.json")),
            ..fast_config()
        };

        {
            let core = PersistCore::open(config.clone()).unwrap();
            core.keys().initialize("pw").unwrap();
            core.profiles().load_or_bootstrap().unwrap();
        }

        let core = PersistCore::open(config).unwrap();
        assert_eq!(core.keys().state(), KeyState::Locked);
        assert!(core.profiles().load_or_bootstrap().unwrap().profiles.is_empty());

        assert!(core.keys().unlock("pw").unwrap());
        assert_eq!(core.profiles().load_or_bootstrap().unwrap().profiles.len(), 1);
    }
}
