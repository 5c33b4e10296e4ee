//! # Error Handling
//!
//! Error types for the persistence core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Lifecycle Errors                                                  │
//! │  │   └── Locked                - Custom password set, no key held      │
//! │  │                                                                      │
//! │  ├── Key Errors                                                        │
//! │  │   ├── KeyDerivationFailed   - Argon2 / HKDF failure                 │
//! │  │   └── InvalidPassword       - Empty or rejected password            │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── EncryptionFailed      - AES-GCM seal failed                   │
//! │  │   ├── DecryptionFailed      - Wrong key or tampered envelope        │
//! │  │   ├── InvalidEnvelope       - Malformed ciphertext string           │
//! │  │   └── PurposeMismatch       - Envelope sealed for another purpose   │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── StorageReadError      - Backend read failed                   │
//! │  │   ├── StorageWriteError     - Backend write failed                  │
//! │  │   └── MigrationFailed       - Schema migration step failed          │
//! │  │                                                                      │
//! │  ├── Sync Errors                                                       │
//! │  │   └── Remote                - Remote update call failed             │
//! │  │                                                                      │
//! │  ├── Configuration Errors                                              │
//! │  │   └── InvalidConfig         - Bad TOML value or env override        │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      ├── SerializationError                                            │
//! │      └── DeserializationError                                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Most of these never reach UI callers. Decrypt failures inside
//! `ConfigStore::load` collapse to "no document", and remote failures are
//! re-queued by the sync queue. They exist so the lower layers can report
//! precisely what went wrong to the logs.

use thiserror::Error;

/// Result type alias for persistence operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the persistence core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Lifecycle Errors (100-199)
    // ========================================================================

    /// A custom password is set but has not been supplied this session
    #[error("Key manager is locked. Unlock with the master password first.")]
    Locked,

    // ========================================================================
    // Key Errors (200-299)
    // ========================================================================

    /// Key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    /// The supplied password cannot be used
    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// The ciphertext string is not a valid envelope
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The envelope was sealed for a different key purpose
    #[error("Envelope purpose mismatch: expected {expected}, found {found}")]
    PurposeMismatch {
        /// Purpose the caller asked for
        expected: String,
        /// Purpose recorded in the envelope
        found: String,
    },

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// A schema migration step failed
    #[error("Migration from version {from} failed: {reason}")]
    MigrationFailed {
        /// Version the failing step started from
        from: u32,
        /// What went wrong
        reason: String,
    },

    // ========================================================================
    // Sync Errors (500-599)
    // ========================================================================

    /// Remote update failed
    #[error("Remote update failed: {0}")]
    Remote(String),

    // ========================================================================
    // Configuration Errors (600-699)
    // ========================================================================

    /// A configuration value could not be used
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Numeric error code, grouped by category:
    /// - 100-199: Lifecycle
    /// - 200-299: Keys
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Sync
    /// - 600-699: Configuration
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::Locked => 100,

            Error::KeyDerivationFailed(_) => 200,
            Error::InvalidPassword(_) => 201,

            Error::EncryptionFailed(_) => 300,
            Error::DecryptionFailed(_) => 301,
            Error::InvalidEnvelope(_) => 302,
            Error::PurposeMismatch { .. } => 303,

            Error::StorageReadError(_) => 400,
            Error::StorageWriteError(_) => 401,
            Error::MigrationFailed { .. } => 402,

            Error::Remote(_) => 500,

            Error::InvalidConfig(_) => 600,

            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by retrying or by the user
    /// supplying the master password.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Locked | Error::Remote(_) | Error::StorageReadError(_)
        )
    }

    /// True for errors that mean "this ciphertext cannot be opened with the
    /// current key". The config store maps all of these to "no document".
    pub fn is_decrypt_failure(&self) -> bool {
        matches!(
            self,
            Error::Locked
                | Error::DecryptionFailed(_)
                | Error::InvalidEnvelope(_)
                | Error::PurposeMismatch { .. }
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::DeserializationError(err.to_string())
        } else {
            Error::SerializationError(err.to_string())
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::DeserializationError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageReadError(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
