//! Encrypted versioned config store.

use std::sync::Arc;

use serde_json::Value;

use super::backend::KeyValueStore;
use super::schema::{self, keys, SCHEMA_VERSION};
use crate::crypto::KeyPurpose;
use crate::error::{Error, Result};
use crate::keys::KeyManager;
use crate::profiles::ConfigDocument;

/// Loads and saves the single encrypted config document
#[derive(Debug, Clone)]
pub struct ConfigStore {
    storage: Arc<dyn KeyValueStore>,
    keys: Arc<KeyManager>,
}

impl ConfigStore {
    /// Create a store over `storage`, sealing with keys from `keys`
    pub fn new(storage: Arc<dyn KeyValueStore>, keys: Arc<KeyManager>) -> Self {
        Self { storage, keys }
    }

    /// The key manager this store seals with
    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Whether an encrypted blob exists, readable or not
    pub fn has_stored_blob(&self) -> bool {
        matches!(self.storage.get(keys::CONFIG), Ok(Some(_)))
    }

    /// A blob exists but no key is held to read it
    pub fn needs_unlock(&self) -> bool {
        self.has_stored_blob() && !self.keys.is_initialized()
    }

    /// Load the config document
    ///
    /// Returns `Ok(None)` when nothing is stored, the manager is locked, or
    /// the blob does not decrypt or parse. Older documents are backed up
    /// under `aixs_config_backup_v{n}` *before* migrating, and the migrated
    /// document is persisted. A failed migration also yields `None`, with
    /// the backup left in place.
    pub fn load(&self) -> Result<Option<ConfigDocument>> {
        let Some(blob) = self.storage.get(keys::CONFIG)? else {
            return Ok(None);
        };

        if !self.keys.is_initialized() {
            tracing::debug!("Config blob present but key manager is locked");
            return Ok(None);
        }

        let (blob, plaintext) = match self.keys.decrypt(&blob, KeyPurpose::Config) {
            Ok(plaintext) => (blob, plaintext),
            Err(e) => match self.recover_rekeyed()? {
                Some(recovered) => recovered,
                None => {
                    tracing::warn!("Failed to decrypt stored config: {}", e);
                    return Ok(None);
                }
            },
        };

        let value: Value = match serde_json::from_str(&plaintext) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Stored config is not valid JSON: {}", e);
                return Ok(None);
            }
        };

        let version = schema::document_version(&value);
        if version < SCHEMA_VERSION {
            self.storage.set(&schema::backup_key(version), &blob)?;
            tracing::info!(
                "Backed up config v{} before migrating to v{}",
                version,
                SCHEMA_VERSION
            );

            let migrated = match schema::migrate(value) {
                Ok(migrated) => migrated,
                Err(e) => {
                    tracing::warn!("Config migration failed, backup kept: {}", e);
                    return Ok(None);
                }
            };

            let mut doc = match decode(migrated) {
                Some(doc) => doc,
                None => return Ok(None),
            };
            doc.normalize_active();
            self.save(&mut doc)?;
            return Ok(Some(doc));
        }

        let Some(mut doc) = decode(value) else {
            return Ok(None);
        };
        doc.normalize_active();
        Ok(Some(doc))
    }

    /// Encrypt and persist `doc`, stamping the current schema version
    ///
    /// Fails with `Locked` when no key is held.
    pub fn save(&self, doc: &mut ConfigDocument) -> Result<()> {
        if !self.keys.is_initialized() {
            return Err(Error::Locked);
        }

        doc.version = SCHEMA_VERSION;
        let json = serde_json::to_string(doc)?;
        let sealed = self.keys.encrypt(&json, KeyPurpose::Config)?;
        self.storage.set(keys::CONFIG, &sealed)?;

        tracing::debug!("Saved config ({} profiles)", doc.profiles.len());
        Ok(())
    }

    /// Delete only the config blob, keeping key material and backups
    pub fn remove_document(&self) -> Result<bool> {
        let removed = self.storage.remove(keys::CONFIG)?;
        if removed {
            tracing::debug!("Removed stored config document");
        }
        Ok(removed)
    }

    /// Delete the blob, all migration backups, then the key material
    ///
    /// The key goes last so no point in the sequence leaves a blob without
    /// the salt and check value that belong to it.
    pub fn clear(&self) -> Result<()> {
        self.storage.remove(keys::CONFIG)?;
        self.storage.remove(keys::CONFIG_REKEY)?;
        for backup in self.storage.keys_with_prefix(keys::CONFIG_BACKUP_PREFIX)? {
            self.storage.remove(&backup)?;
        }
        self.keys.forget()?;

        tracing::info!("Cleared stored config and key material");
        Ok(())
    }

    /// Switch to `new_password` and re-seal the current document under it
    ///
    /// Returns `false` without changing anything when the manager is
    /// locked, or when a blob exists that the current key cannot read.
    /// Migration backups stay sealed under the old key.
    ///
    /// ```text
    /// 1. seal the document under the staged key ──► aixs_config_rekey
    /// 2. commit the key (version, check value, flag)
    /// 3. aixs_config ◄── re-sealed document; drop aixs_config_rekey
    /// ```
    ///
    /// A failure at step 3 rolls the key back. If the process dies between
    /// steps 2 and 3, the next [`load`](Self::load) under the new key
    /// promotes the copy.
    pub fn rekey(&self, new_password: &str) -> Result<bool> {
        if !self.keys.is_initialized() {
            return Ok(false);
        }

        let doc = self.load()?;
        if doc.is_none() && self.has_stored_blob() {
            tracing::warn!("Refusing to re-key: stored config is unreadable under the current key");
            return Ok(false);
        }

        let staged = self.keys.stage_password_change(new_password)?;
        let Some(mut doc) = doc else {
            self.keys.commit_password_change(staged)?;
            return Ok(true);
        };

        doc.version = SCHEMA_VERSION;
        let sealed = staged.encrypt(&serde_json::to_string(&doc)?, KeyPurpose::Config)?;
        self.storage.set(keys::CONFIG_REKEY, &sealed)?;

        let previous = match self.keys.commit_password_change(staged) {
            Ok(previous) => previous,
            Err(e) => {
                self.discard_rekeyed();
                return Err(e);
            }
        };

        if let Err(e) = self.storage.set(keys::CONFIG, &sealed) {
            tracing::warn!("Failed to write re-keyed config: {}", e);
            match self.keys.rollback_password_change(previous) {
                Ok(()) => self.discard_rekeyed(),
                Err(rollback) => {
                    tracing::warn!("Rollback incomplete, keeping re-keyed copy: {}", rollback)
                }
            }
            return Err(e);
        }

        self.discard_rekeyed();
        tracing::info!("Config re-sealed under key v{}", self.keys.key_version());
        Ok(true)
    }

    /// The copy left by a re-key that committed its key but never replaced
    /// the blob, if the current key opens it
    fn recover_rekeyed(&self) -> Result<Option<(String, String)>> {
        let Some(copy) = self.storage.get(keys::CONFIG_REKEY)? else {
            return Ok(None);
        };
        let Ok(plaintext) = self.keys.decrypt(&copy, KeyPurpose::Config) else {
            return Ok(None);
        };

        match self.storage.set(keys::CONFIG, &copy) {
            Ok(()) => {
                self.discard_rekeyed();
                tracing::info!("Recovered config from an interrupted re-key");
            }
            Err(e) => tracing::warn!(
                "Recovered config from an interrupted re-key but could not persist it: {}",
                e
            ),
        }
        Ok(Some((copy, plaintext)))
    }

    fn discard_rekeyed(&self) {
        if let Err(e) = self.storage.remove(keys::CONFIG_REKEY) {
            tracing::warn!("Failed to remove re-keyed copy: {}", e);
        }
    }
}

fn decode(value: Value) -> Option<ConfigDocument> {
    match serde_json::from_value(value) {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::warn!("Stored config does not match the document shape: {}", e);
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use crate::keys::KeyState;
    use crate::profiles::{ConfigProfile, UserConfig};
    use crate::storage::{FailingStore, MemoryStore};
    use serde_json::json;

    fn store() -> (Arc<MemoryStore>, ConfigStore) {
        let storage = Arc::new(MemoryStore::new());
        let keys = Arc::new(KeyManager::new(storage.clone(), KdfParams::fast()).unwrap());
        (storage.clone(), ConfigStore::new(storage, keys))
    }

    fn reopen(storage: &Arc<MemoryStore>) -> ConfigStore {
        let keys = Arc::new(KeyManager::new(storage.clone(), KdfParams::fast()).unwrap());
        ConfigStore::new(storage.clone(), keys)
    }

    fn over(storage: &Arc<FailingStore>) -> ConfigStore {
        let keys = Arc::new(KeyManager::new(storage.clone(), KdfParams::fast()).unwrap());
        ConfigStore::new(storage.clone(), keys)
    }

    fn sample_doc() -> ConfigDocument {
        ConfigDocument {
            version: 0,
            active_profile_id: Some("cfg_1".into()),
            profiles: vec![ConfigProfile {
                id: "cfg_1".into(),
                name: "Main".into(),
                config: UserConfig {
                    api_key: "sk-secret-value".into(),
                    ..Default::default()
                },
                pricing: None,
                last_test: None,
                created_at: "2024-05-01T00:00:00.000Z".into(),
                updated_at: "2024-05-01T00:00:00.000Z".into(),
            }],
        }
    }

    #[test]
    fn test_save_load_under_default_key() {
        let (storage, store) = store();
        let mut doc = sample_doc();
        store.save(&mut doc).unwrap();
        assert_eq!(doc.version, SCHEMA_VERSION);

        let raw = storage.get(keys::CONFIG).unwrap().unwrap();
        assert!(raw.starts_with("AIXS_V3:"));
        assert!(!raw.contains("sk-secret-value"));

        let loaded = reopen(&storage).load().unwrap().unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_load_empty() {
        let (_, store) = store();
        assert!(store.load().unwrap().is_none());
        assert!(!store.has_stored_blob());
    }

    #[test]
    fn test_locked_load_and_save() {
        let (storage, store) = store();
        store.key_manager().initialize("pw").unwrap();
        store.save(&mut sample_doc()).unwrap();

        let locked = reopen(&storage);
        assert!(locked.needs_unlock());
        assert!(locked.load().unwrap().is_none());
        assert!(matches!(
            locked.save(&mut sample_doc()),
            Err(Error::Locked)
        ));
        assert!(locked.has_stored_blob());
    }

    #[test]
    fn test_wrong_password_loads_nothing() {
        let (storage, store) = store();
        store.key_manager().initialize("P1").unwrap();
        store.save(&mut sample_doc()).unwrap();

        store.key_manager().reset();
        store.key_manager().initialize("P2").unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(storage.get(keys::CONFIG).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_blob_loads_nothing() {
        let (storage, store) = store();
        storage.set(keys::CONFIG, "AIXS_V3:garbage").unwrap();
        assert!(store.load().unwrap().is_none());

        storage.set(keys::CONFIG, "not even an envelope").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_legacy_document_migrates_with_backup() {
        let (storage, store) = store();
        let legacy = json!({
            "provider": "kimi",
            "apiKey": "sk-old",
            "model": "moonshot-v1-8k",
        })
        .to_string();
        let sealed = store
            .key_manager()
            .encrypt(&legacy, KeyPurpose::Config)
            .unwrap();
        storage.set(keys::CONFIG, &sealed).unwrap();

        let doc = store.load().unwrap().unwrap();
        assert_eq!(doc.version, SCHEMA_VERSION);
        assert_eq!(doc.profiles.len(), 1);
        assert_eq!(doc.profiles[0].config.api_key, "sk-old");
        assert_eq!(doc.active_profile_id.as_deref(), Some(doc.profiles[0].id.as_str()));

        assert_eq!(
            storage.get(&schema::backup_key(1)).unwrap().as_deref(),
            Some(sealed.as_str())
        );

        // Persisted migrated; a second load migrates nothing.
        let again = store.load().unwrap().unwrap();
        assert_eq!(again, doc);
    }

    #[test]
    fn test_failed_migration_keeps_backup() {
        let (storage, store) = store();
        let broken = json!({ "apiKey": "sk-old" }).to_string();
        let sealed = store
            .key_manager()
            .encrypt(&broken, KeyPurpose::Config)
            .unwrap();
        storage.set(keys::CONFIG, &sealed).unwrap();

        assert!(store.load().unwrap().is_none());
        assert_eq!(
            storage.get(&schema::backup_key(1)).unwrap().as_deref(),
            Some(sealed.as_str())
        );
        assert_eq!(storage.get(keys::CONFIG).unwrap().as_deref(), Some(sealed.as_str()));
    }

    #[test]
    fn test_clear_removes_everything() {
        let (storage, store) = store();
        store.key_manager().initialize("pw").unwrap();
        store.save(&mut sample_doc()).unwrap();
        storage.set(&schema::backup_key(1), "old").unwrap();

        store.clear().unwrap();

        assert!(storage.is_empty());
        assert!(!store.key_manager().has_custom_password());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_rekey_preserves_document() {
        let (storage, store) = store();
        store.key_manager().initialize("first").unwrap();
        let mut doc = sample_doc();
        store.save(&mut doc).unwrap();

        assert!(store.rekey("second").unwrap());

        let reopened = reopen(&storage);
        assert!(!reopened.key_manager().unlock("first").unwrap());
        assert!(reopened.key_manager().unlock("second").unwrap());
        assert_eq!(reopened.load().unwrap().unwrap(), doc);
    }

    #[test]
    fn test_rekey_from_default_key() {
        let (storage, store) = store();
        let mut doc = sample_doc();
        store.save(&mut doc).unwrap();

        assert!(store.rekey("mine").unwrap());

        let reopened = reopen(&storage);
        assert!(reopened.load().unwrap().is_none());
        assert!(reopened.key_manager().unlock("mine").unwrap());
        assert_eq!(reopened.load().unwrap().unwrap(), doc);
    }

    #[test]
    fn test_rekey_while_locked() {
        let (storage, store) = store();
        store.key_manager().initialize("pw").unwrap();
        store.save(&mut sample_doc()).unwrap();

        assert!(!reopen(&storage).rekey("other").unwrap());
    }

    #[test]
    fn test_rekey_failed_write_keeps_old_password() {
        let storage = Arc::new(FailingStore::default());
        let store = over(&storage);
        store.key_manager().initialize("old").unwrap();
        let mut doc = sample_doc();
        store.save(&mut doc).unwrap();

        storage.fail_set(keys::CONFIG);
        assert!(matches!(store.rekey("new"), Err(Error::StorageWriteError(_))));
        assert_eq!(store.key_manager().key_version(), 1);
        assert!(storage.get(keys::CONFIG_REKEY).unwrap().is_none());
        assert_eq!(store.load().unwrap(), Some(doc.clone()));

        let next = over(&storage);
        assert!(!next.key_manager().unlock("new").unwrap());
        assert!(next.key_manager().unlock("old").unwrap());
        assert_eq!(next.load().unwrap(), Some(doc));
    }

    #[test]
    fn test_rekey_failed_commit_keeps_old_password() {
        let storage = Arc::new(FailingStore::default());
        let store = over(&storage);
        store.key_manager().initialize("old").unwrap();
        let mut doc = sample_doc();
        store.save(&mut doc).unwrap();

        storage.fail_set(keys::KEY_CHECK);
        assert!(store.rekey("new").is_err());
        assert!(storage.get(keys::CONFIG_REKEY).unwrap().is_none());

        let next = over(&storage);
        assert!(next.key_manager().unlock("old").unwrap());
        assert_eq!(next.load().unwrap(), Some(doc));
    }

    #[test]
    fn test_interrupted_rekey_recovers_on_load() {
        let (storage, store) = store();
        store.key_manager().initialize("old").unwrap();
        let mut doc = sample_doc();
        store.save(&mut doc).unwrap();

        // Key committed, blob not yet replaced.
        let staged = store.key_manager().stage_password_change("new").unwrap();
        let sealed = staged
            .encrypt(&serde_json::to_string(&doc).unwrap(), KeyPurpose::Config)
            .unwrap();
        storage.set(keys::CONFIG_REKEY, &sealed).unwrap();
        store.key_manager().commit_password_change(staged).unwrap();

        let next = reopen(&storage);
        assert!(!next.key_manager().unlock("old").unwrap());
        assert!(next.key_manager().unlock("new").unwrap());
        assert_eq!(next.load().unwrap(), Some(doc));
        assert_eq!(storage.get(keys::CONFIG).unwrap(), Some(sealed));
        assert!(storage.get(keys::CONFIG_REKEY).unwrap().is_none());
    }

    #[test]
    fn test_rekey_copy_without_commit_is_ignored() {
        let (storage, store) = store();
        store.key_manager().initialize("old").unwrap();
        let mut doc = sample_doc();
        store.save(&mut doc).unwrap();

        // Copy written, key never committed.
        let staged = store.key_manager().stage_password_change("new").unwrap();
        let sealed = staged.encrypt("{}", KeyPurpose::Config).unwrap();
        storage.set(keys::CONFIG_REKEY, &sealed).unwrap();

        let next = reopen(&storage);
        assert!(next.key_manager().unlock("old").unwrap());
        assert_eq!(next.load().unwrap(), Some(doc));

        next.clear().unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_interrupted_clear_does_not_lock_out() {
        let storage = Arc::new(FailingStore::default());
        let store = over(&storage);
        store.key_manager().initialize("pw").unwrap();
        store.save(&mut sample_doc()).unwrap();

        storage.fail_remove(keys::KEY_VERSION);
        assert!(store.clear().is_err());

        let next = over(&storage);
        assert_eq!(next.key_manager().state(), KeyState::Unlocked { custom: false });
        assert!(next.load().unwrap().is_none());

        next.key_manager().initialize("fresh").unwrap();
        let mut doc = sample_doc();
        next.save(&mut doc).unwrap();

        let after = over(&storage);
        assert!(after.key_manager().unlock("fresh").unwrap());
        assert_eq!(after.load().unwrap(), Some(doc));
    }
}
