//! # Storage Module
//!
//! The encrypted, versioned config document on top of a plain key-value
//! store.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ConfigStore                                                            │
//! │    load():  get ─► decrypt(Config) ─► parse ─► backup ─► migrate ─► save│
//! │    save():  stamp version ─► serialize ─► encrypt(Config) ─► set        │
//! │    clear(): remove blob ─► remove backups ─► KeyManager::forget         │
//! │                          │                                              │
//! │                          ▼                                              │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  KeyValueStore (MemoryStore / JsonFileStore)                    │   │
//! │  │                                                                 │   │
//! │  │  aixs_config                 AIXS_V3 envelope                   │   │
//! │  │  aixs_config_backup_v{n}     pre-migration blob                 │   │
//! │  │  aixs_key_salt / _version / _check / has_custom_password        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Plaintext secrets never reach the key-value store; the only value under
//! `aixs_config` is an envelope.

mod backend;
mod config_store;
pub mod schema;

pub use backend::{JsonFileStore, KeyValueStore, MemoryStore};
#[cfg(test)]
pub(crate) use backend::FailingStore;
pub use config_store::ConfigStore;
pub use schema::{keys, SCHEMA_VERSION};
