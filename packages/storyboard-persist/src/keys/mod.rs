//! # Key Lifecycle
//!
//! The single source of truth for whether encryption is currently possible,
//! and with which key.
//!
//! ## State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        KEY MANAGER STATES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   UNINITIALIZED ──(automatic)──► UNLOCKED (default key)                 │
//! │   (no custom password)                 │                                │
//! │         ▲                              │ initialize(password)           │
//! │         │                              ▼                                │
//! │         │ forget()             UNLOCKED (custom key)                    │
//! │         │                              │                                │
//! │         │                              │ reset() / new session          │
//! │         │                              ▼                                │
//! │         └──────────────────────── LOCKED                                │
//! │                                        │                                │
//! │                        verify_master_password(p) == true                │
//! │                        then initialize(p)  (or unlock(p))               │
//! │                                        ▼                                │
//! │                               UNLOCKED (custom key)                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Persisted Side Keys
//!
//! | Key | Content |
//! |-----|---------|
//! | `aixs_key_salt` | hex salt for Argon2id |
//! | `aixs_key_version` | incremented on password change |
//! | `aixs_has_custom_password` | `"true"` once a password was set |
//! | `aixs_key_check` | envelope of `"ok"` sealed for `Verification` |
//!
//! The raw key is never persisted. A LOCKED manager refuses every
//! encrypt/decrypt; there is no fallback to the default key.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::crypto::{
    self, derive_master_key, derive_purpose_key, generate_salt, KdfParams, KeyPurpose, MasterKey,
    DEFAULT_PASSWORD, DEFAULT_SALT,
};
use crate::error::{Error, Result};
use crate::storage::{keys, KeyValueStore};

/// Plaintext of the verification check value
const CHECK_PLAINTEXT: &str = "ok";

/// Externally visible lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KeyState {
    /// A custom password is set but not supplied this session
    Locked,
    /// A key is held
    Unlocked {
        /// Whether the key came from a user password
        custom: bool,
    },
}

/// Summary of the key configuration, safe to show in UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    /// Current key version
    pub version: u32,
    /// Whether a custom password has been set
    pub has_custom_password: bool,
    /// Purposes keys can be derived for
    pub purposes: Vec<KeyPurpose>,
}

/// Side keys a password change writes, in write order
const COMMITTED_KEYS: [&str; 3] = [keys::KEY_VERSION, keys::KEY_CHECK, keys::HAS_CUSTOM_PASSWORD];

struct HeldKey {
    master: MasterKey,
    custom: bool,
    version: u32,
}

/// A derived key that is not yet the current one
pub(crate) struct StagedKey {
    master: MasterKey,
    version: u32,
}

impl StagedKey {
    /// Seal `plaintext` under the staged key and version
    pub(crate) fn encrypt(&self, plaintext: &str, purpose: KeyPurpose) -> Result<String> {
        seal_with(&self.master, purpose, self.version, plaintext)
    }
}

/// What a committed password change replaced
pub(crate) struct PreviousKey {
    held: Option<HeldKey>,
    side: Vec<(&'static str, Option<String>)>,
}

/// Derives, holds and forgets the master key
pub struct KeyManager {
    storage: Arc<dyn KeyValueStore>,
    params: KdfParams,
    held: RwLock<Option<HeldKey>>,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("params", &self.params)
            .field("state", &self.state())
            .finish()
    }
}

impl KeyManager {
    /// Create a key manager over `storage`
    ///
    /// Without a persisted custom password the default key is derived
    /// right away; otherwise the manager starts LOCKED.
    pub fn new(storage: Arc<dyn KeyValueStore>, params: KdfParams) -> Result<Self> {
        let manager = Self {
            storage,
            params,
            held: RwLock::new(None),
        };

        if manager.has_custom_password() {
            tracing::info!("Custom master password set; key manager starts locked");
        } else {
            manager.load_default_key()?;
        }

        Ok(manager)
    }

    /// Derive a key from `password` and hold it
    ///
    /// Loads the persisted salt (generating one on first use), marks the
    /// custom-password flag, and writes the check value if there is none
    /// yet. Whether the password is *correct* only shows when decrypts
    /// succeed; call [`verify_master_password`](Self::verify_master_password)
    /// first to unlock safely.
    pub fn initialize(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::InvalidPassword("password must not be empty".into()));
        }

        let salt = match self.storage.get(keys::SALT)? {
            Some(salt) if !salt.is_empty() => salt,
            _ => {
                let salt = generate_salt();
                self.storage.set(keys::SALT, &salt)?;
                salt
            }
        };

        let version = self.stored_key_version()?;
        self.storage.set(keys::KEY_VERSION, &version.to_string())?;

        let master = derive_master_key(password, salt.as_bytes(), &self.params)?;

        let first_setup =
            !self.has_custom_password() || self.storage.get(keys::KEY_CHECK)?.is_none();
        if first_setup {
            let check = seal_with(&master, KeyPurpose::Verification, version, CHECK_PLAINTEXT)?;
            self.storage.set(keys::KEY_CHECK, &check)?;
        }

        self.storage.set(keys::HAS_CUSTOM_PASSWORD, "true")?;

        *self.held.write() = Some(HeldKey {
            master,
            custom: true,
            version,
        });

        tracing::info!("Key manager unlocked with custom password (key v{})", version);
        Ok(())
    }

    /// Drop the in-memory key
    ///
    /// Persisted salt, version and flag stay. With a custom password the
    /// manager is LOCKED afterwards; without one the default key is
    /// re-derived.
    pub fn reset(&self) {
        *self.held.write() = None;

        if self.has_custom_password() {
            tracing::info!("Key manager reset; now locked");
        } else if let Err(e) = self.load_default_key() {
            tracing::warn!("Failed to re-derive default key after reset: {}", e);
        }
    }

    /// True iff a key is held
    pub fn is_initialized(&self) -> bool {
        self.held.read().is_some()
    }

    /// True iff the user has set a custom password
    ///
    /// Reads the persisted flag, independent of lock state. An unreadable
    /// flag counts as set, which keeps the manager locked.
    pub fn has_custom_password(&self) -> bool {
        match self.storage.get(keys::HAS_CUSTOM_PASSWORD) {
            Ok(flag) => flag.as_deref() == Some("true"),
            Err(e) => {
                tracing::warn!("Failed to read custom-password flag: {}", e);
                true
            }
        }
    }

    /// Current lock state
    pub fn state(&self) -> KeyState {
        match self.held.read().as_ref() {
            Some(held) => KeyState::Unlocked {
                custom: held.custom,
            },
            None => KeyState::Locked,
        }
    }

    /// Version of the held key, or the persisted version when locked
    pub fn key_version(&self) -> u32 {
        if let Some(held) = self.held.read().as_ref() {
            return held.version;
        }
        self.stored_key_version().unwrap_or(1)
    }

    /// Key configuration summary
    pub fn key_info(&self) -> KeyInfo {
        KeyInfo {
            version: self.key_version(),
            has_custom_password: self.has_custom_password(),
            purposes: KeyPurpose::ALL.to_vec(),
        }
    }

    /// Encrypt `plaintext` for `purpose`
    pub fn encrypt(&self, plaintext: &str, purpose: KeyPurpose) -> Result<String> {
        let held = self.held.read();
        let held = held.as_ref().ok_or(Error::Locked)?;
        seal_with(&held.master, purpose, held.version, plaintext)
    }

    /// Decrypt an envelope sealed for `purpose`
    ///
    /// Fails with `Locked` when no key is held, never falling back to the
    /// default key.
    pub fn decrypt(&self, ciphertext: &str, purpose: KeyPurpose) -> Result<String> {
        let held = self.held.read();
        let held = held.as_ref().ok_or(Error::Locked)?;
        open_with(&held.master, purpose, ciphertext)
    }

    /// Check `password` against the persisted check value
    ///
    /// Pure: never changes the lock state. Returns `true` when no custom
    /// password is set. When there is no check value (data written before
    /// check values existed) the candidate is tried against the config
    /// blob instead.
    pub fn verify_master_password(&self, password: &str) -> bool {
        if !self.has_custom_password() {
            return true;
        }

        match self.try_verify(password) {
            Ok(ok) => ok,
            Err(e) => {
                tracing::debug!("Password verification errored: {}", e);
                false
            }
        }
    }

    /// Verify, then initialize only if the password is right
    pub fn unlock(&self, password: &str) -> Result<bool> {
        if !self.verify_master_password(password) {
            tracing::info!("Unlock rejected: wrong master password");
            return Ok(false);
        }
        self.initialize(password)?;
        Ok(true)
    }

    /// Switch to a new password
    ///
    /// Requires an unlocked manager. Bumps the key version and rewrites the
    /// check value. Data sealed under the old key is not touched;
    /// `ConfigStore::rekey` re-seals the config document before committing.
    pub fn change_master_password(&self, new_password: &str) -> Result<()> {
        let staged = self.stage_password_change(new_password)?;
        self.commit_password_change(staged)?;
        Ok(())
    }

    /// Derive the key for `new_password` without committing it
    ///
    /// Nothing that decides which password verifies is written here. The
    /// salt is generated and stored only when replacing the default key,
    /// where it is not read yet.
    pub(crate) fn stage_password_change(&self, new_password: &str) -> Result<StagedKey> {
        if new_password.is_empty() {
            return Err(Error::InvalidPassword("password must not be empty".into()));
        }

        let (custom, version) = match self.held.read().as_ref() {
            Some(held) if held.custom => (true, held.version + 1),
            Some(_) => (false, self.stored_key_version()?),
            None => return Err(Error::Locked),
        };

        let salt = match self.storage.get(keys::SALT)? {
            Some(salt) if !salt.is_empty() => salt,
            _ if custom => return Err(Error::KeyDerivationFailed("salt missing".into())),
            _ => {
                let salt = generate_salt();
                self.storage.set(keys::SALT, &salt)?;
                salt
            }
        };

        let master = derive_master_key(new_password, salt.as_bytes(), &self.params)?;
        Ok(StagedKey { master, version })
    }

    /// Make a staged key the current one
    ///
    /// Writes the version, the check value and the custom-password flag,
    /// then swaps the held key. A failed write restores what was there.
    /// The returned [`PreviousKey`] undoes the switch.
    pub(crate) fn commit_password_change(&self, staged: StagedKey) -> Result<PreviousKey> {
        let mut side = Vec::with_capacity(COMMITTED_KEYS.len());
        for key in COMMITTED_KEYS {
            side.push((key, self.storage.get(key)?));
        }

        let StagedKey { master, version } = staged;
        let check = seal_with(&master, KeyPurpose::Verification, version, CHECK_PLAINTEXT)?;

        let written = self
            .storage
            .set(keys::KEY_VERSION, &version.to_string())
            .and_then(|()| self.storage.set(keys::KEY_CHECK, &check))
            .and_then(|()| self.storage.set(keys::HAS_CUSTOM_PASSWORD, "true"));
        if let Err(e) = written {
            tracing::warn!("Password change not committed: {}", e);
            let _ = self.restore_side_keys(&side);
            return Err(e);
        }

        let held = self.held.write().replace(HeldKey {
            master,
            custom: true,
            version,
        });
        let old_version = held.as_ref().filter(|held| held.custom).map(|held| held.version);

        match old_version {
            Some(old) => tracing::info!("Master password changed (key v{} -> v{})", old, version),
            None => tracing::info!("First master password set (key v{})", version),
        }
        Ok(PreviousKey { held, side })
    }

    /// Undo a committed password change
    ///
    /// The held key is restored even when a persisted side key cannot be;
    /// the first such failure is returned.
    pub(crate) fn rollback_password_change(&self, previous: PreviousKey) -> Result<()> {
        *self.held.write() = previous.held;
        let restored = self.restore_side_keys(&previous.side);
        tracing::warn!("Password change rolled back");
        restored
    }

    /// Erase every persisted key side key and fall back to the default key
    ///
    /// Irreversible. Anything sealed under the custom key becomes
    /// permanently unreadable, so callers delete that data *first*.
    pub fn forget(&self) -> Result<()> {
        // Flag first. Without it the other side keys are never read, and
        // the next initialize overwrites them.
        self.storage.remove(keys::HAS_CUSTOM_PASSWORD)?;
        self.load_default_key()?;

        self.storage.remove(keys::KEY_CHECK)?;
        self.storage.remove(keys::SALT)?;
        self.storage.remove(keys::KEY_VERSION)?;

        tracing::info!("Master password forgotten; using default key");
        Ok(())
    }

    fn restore_side_keys(&self, side: &[(&str, Option<String>)]) -> Result<()> {
        let mut first_error = None;
        for (key, value) in side {
            let restored = match value {
                Some(value) => self.storage.set(key, value),
                None => self.storage.remove(key).map(|_| ()),
            };
            if let Err(e) = restored {
                tracing::warn!("Failed to restore {}: {}", key, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn try_verify(&self, password: &str) -> Result<bool> {
        let Some(salt) = self.storage.get(keys::SALT)? else {
            // No key was ever derived; only accept when there is nothing
            // it could have sealed.
            return Ok(self.storage.get(keys::KEY_CHECK)?.is_none()
                && self.storage.get(keys::CONFIG)?.is_none());
        };
        let candidate = derive_master_key(password, salt.as_bytes(), &self.params)?;

        if let Some(check) = self.storage.get(keys::KEY_CHECK)? {
            return Ok(
                open_with(&candidate, KeyPurpose::Verification, &check).ok().as_deref()
                    == Some(CHECK_PLAINTEXT),
            );
        }

        match self.storage.get(keys::CONFIG)? {
            None => Ok(true),
            Some(blob) => Ok(open_with(&candidate, KeyPurpose::Config, &blob)
                .ok()
                .and_then(|json| serde_json::from_str::<serde_json::Value>(&json).ok())
                .is_some_and(|value| value.is_object())),
        }
    }

    fn load_default_key(&self) -> Result<()> {
        let master = derive_master_key(DEFAULT_PASSWORD, DEFAULT_SALT.as_bytes(), &self.params)?;
        *self.held.write() = Some(HeldKey {
            master,
            custom: false,
            version: 1,
        });
        tracing::debug!("Default key derived");
        Ok(())
    }

    fn stored_key_version(&self) -> Result<u32> {
        Ok(self
            .storage
            .get(keys::KEY_VERSION)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(1))
    }
}

fn seal_with(master: &MasterKey, purpose: KeyPurpose, version: u32, plaintext: &str) -> Result<String> {
    let key = derive_purpose_key(master, purpose)?;
    crypto::seal(&key, purpose, version, plaintext.as_bytes())
}

fn open_with(master: &MasterKey, purpose: KeyPurpose, envelope: &str) -> Result<String> {
    let key = derive_purpose_key(master, purpose)?;
    let bytes = crypto::open(&key, purpose, envelope)?;
    String::from_utf8(bytes)
        .map_err(|_| Error::DecryptionFailed("plaintext is not valid UTF-8".into()))
}

// ============================================================================
// TESTS
// ============================================================================
