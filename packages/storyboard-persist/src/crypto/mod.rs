//! # Cryptography Module
//!
//! All cryptographic primitives used by the persistence core.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Master Password ──Argon2id(salt)──► Master Key (memory only)          │
//! │                                          │                              │
//! │                                          ▼                              │
//! │                               HKDF-SHA256(info = purpose)               │
//! │                                          │                              │
//! │                                          ▼                              │
//! │                               AES-256-GCM purpose key                   │
//! │                                          │                              │
//! │                                          ▼                              │
//! │         "AIXS_V3:" + header{v, p} + base64(nonce || ct || tag)         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | Argon2id | Password stretching |
//! | HKDF-SHA256 | Per-purpose subkeys |
//! | AES-256-GCM | Authenticated encryption |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: Master and purpose keys are zeroized when dropped
//! 2. **Secure Random**: `rand::rngs::OsRng` for salts and nonces
//! 3. **No Key Reuse**: Unique nonces for every encryption operation

mod encryption;
mod envelope;
mod kdf;

pub use encryption::{decrypt, encrypt, EncryptionKey, Nonce, KEY_SIZE, NONCE_SIZE};
pub use envelope::{open, peek_header, seal, EnvelopeHeader, ENVELOPE_PREFIX};
pub use kdf::{
    derive_master_key, derive_purpose_key, generate_salt, KdfParams, KeyPurpose, MasterKey,
    DEFAULT_SALT,
};
pub(crate) use kdf::DEFAULT_PASSWORD;
