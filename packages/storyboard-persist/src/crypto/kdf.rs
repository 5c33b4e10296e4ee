//! # Key Derivation Functions
//!
//! Turns a master password into a master key, and the master key into
//! independent per-purpose encryption keys.
//!
//! ## Key Derivation Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY DERIVATION HIERARCHY                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  MASTER PASSWORD  (user supplied, or built-in default)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │                                ▼                                        │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Argon2id(                                                      │   │
//! │  │    password = master password,                                  │   │
//! │  │    salt     = persisted random salt (16 bytes, hex),            │   │
//! │  │    m/t/p    = KdfParams                                         │   │
//! │  │  )                                                              │   │
//! │  │  → 32-byte MASTER KEY (held in memory only)                     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │       ┌──────────────┬─────────┴────┬──────────────┬─────────────┐     │
//! │       ▼              ▼              ▼              ▼             ▼     │
//! │   HKDF(info=     HKDF(info=     HKDF(info=     HKDF(info=   HKDF(info= │
//! │   "config")      "project")     "scene")       "general")   "verify")  │
//! │                                                                         │
//! │  Each purpose key is an independent AES-256-GCM key. Data sealed for   │
//! │  one purpose cannot be opened with another, so the verification       │
//! │  check value is useless as an oracle against the config blob.         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Considerations
//!
//! | Aspect | Design Choice |
//! |--------|---------------|
//! | Password stretching | Argon2id, tunable cost |
//! | Key Separation | Different HKDF `info` per purpose |
//! | Version String | "-v1" suffix on every domain |

use std::fmt;
use std::str::FromStr;

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use super::encryption::{EncryptionKey, KEY_SIZE};
use crate::error::{Error, Result};

/// Length of a freshly generated salt in bytes
pub const SALT_SIZE: usize = 16;

/// Salt used for the built-in default key
///
/// The default key protects data for users who never set a password; it
/// must not depend on a persisted random salt so it survives side-key loss.
pub const DEFAULT_SALT: &str = "aixs-manga-creator-default-salt";

/// Built-in password used when no custom password has been set
pub(crate) const DEFAULT_PASSWORD: &str = "aixs-manga-creator-secret-key-2024";

/// Domain separation strings for HKDF
pub mod domain {
    /// Configuration profiles (the encrypted config blob)
    pub const CONFIG: &[u8] = b"aixs-config-key-v1";

    /// Project data
    pub const PROJECT: &[u8] = b"aixs-project-key-v1";

    /// Scene data
    pub const SCENE: &[u8] = b"aixs-scene-key-v1";

    /// General data
    pub const GENERAL: &[u8] = b"aixs-general-key-v1";

    /// Password verification check value
    pub const VERIFICATION: &[u8] = b"aixs-verification-key-v1";
}

/// What a derived key is used for
///
/// Every purpose gets its own subkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    /// API configuration profiles
    Config,
    /// Project data
    Project,
    /// Scene data
    Scene,
    /// General data
    General,
    /// The password check value
    Verification,
}

impl KeyPurpose {
    /// All purposes, in a stable order
    pub const ALL: [KeyPurpose; 5] = [
        KeyPurpose::Config,
        KeyPurpose::Project,
        KeyPurpose::Scene,
        KeyPurpose::General,
        KeyPurpose::Verification,
    ];

    /// Short name recorded in envelope headers
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::Config => "config",
            KeyPurpose::Project => "project",
            KeyPurpose::Scene => "scene",
            KeyPurpose::General => "general",
            KeyPurpose::Verification => "verification",
        }
    }

    fn domain(&self) -> &'static [u8] {
        match self {
            KeyPurpose::Config => domain::CONFIG,
            KeyPurpose::Project => domain::PROJECT,
            KeyPurpose::Scene => domain::SCENE,
            KeyPurpose::General => domain::GENERAL,
            KeyPurpose::Verification => domain::VERIFICATION,
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyPurpose {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        KeyPurpose::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::InvalidEnvelope(format!("Unknown key purpose '{}'", s)))
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl KdfParams {
    /// Cheap parameters for tests. Never use for real data.
    pub fn fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP baseline for Argon2id
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// The password-derived root key
///
/// Zeroized when dropped. Never leaves the key manager.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Stretch a password into a master key with Argon2id
pub fn derive_master_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<MasterKey> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| Error::KeyDerivationFailed(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| Error::KeyDerivationFailed(format!("Argon2 failed: {}", e)))?;

    Ok(MasterKey(key))
}

/// Derive the subkey for one purpose
///
/// ## Process
///
/// ```text
/// Master Key (32 bytes)
///       │
///       └──► HKDF-SHA256(info = purpose domain) → AES-256-GCM key
/// ```
pub fn derive_purpose_key(master: &MasterKey, purpose: KeyPurpose) -> Result<EncryptionKey> {
    let hkdf = Hkdf::<Sha256>::new(None, &master.0);

    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(purpose.domain(), &mut key).map_err(|_| {
        Error::KeyDerivationFailed(format!("Failed to derive {} key", purpose))
    })?;

    Ok(EncryptionKey::from_bytes(key))
}

/// Generate a fresh random salt, hex encoded
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_deterministic() {
        let params = KdfParams::fast();
        let k1 = derive_master_key("hunter2", b"salt-salt-salt", &params).unwrap();
        let k2 = derive_master_key("hunter2", b"salt-salt-salt", &params).unwrap();
        assert_eq!(k1.0, k2.0);
    }

    #[test]
    fn test_different_passwords_different_keys() {
        let params = KdfParams::fast();
        let k1 = derive_master_key("one", b"salt-salt-salt", &params).unwrap();
        let k2 = derive_master_key("two", b"salt-salt-salt", &params).unwrap();
        assert_ne!(k1.0, k2.0);
    }

    #[test]
    fn test_different_salts_different_keys() {
        let params = KdfParams::fast();
        let k1 = derive_master_key("same", b"salt-aaaaaaaa", &params).unwrap();
        let k2 = derive_master_key("same", b"salt-bbbbbbbb", &params).unwrap();
        assert_ne!(k1.0, k2.0);
    }

    #[test]
    fn test_purpose_keys_are_independent() {
        let master = MasterKey::from_bytes([42u8; KEY_SIZE]);
        let keys: Vec<[u8; KEY_SIZE]> = KeyPurpose::ALL
            .iter()
            .map(|p| derive_purpose_key(&master, *p).unwrap().as_inner())
            .collect();

        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                assert_ne!(keys[i], keys[j]);
            }
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        let err = derive_master_key("pw", b"salt-salt-salt", &params).unwrap_err();
        assert!(matches!(err, Error::KeyDerivationFailed(_)));
    }

    #[test]
    fn test_purpose_round_trips_through_str() {
        for purpose in KeyPurpose::ALL {
            assert_eq!(purpose.as_str().parse::<KeyPurpose>().unwrap(), purpose);
        }
        assert!("bogus".parse::<KeyPurpose>().is_err());
    }

    #[test]
    fn test_generated_salts_differ() {
        let a = generate_salt();
        let b = generate_salt();
        assert_eq!(a.len(), SALT_SIZE * 2);
        assert_ne!(a, b);
    }
}
