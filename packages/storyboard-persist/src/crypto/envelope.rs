//! # Sealed Envelopes
//!
//! String form of an encrypted value, as written to the key-value store.
//!
//! ```text
//! AIXS_V3:<base64 header>:<base64 nonce || ciphertext || tag>
//!          │
//!          └── {"v": key_version, "p": "config"}
//! ```
//!
//! The base64 header segment is also the AES-GCM associated data, so
//! editing the purpose or version in the header breaks authentication.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::encryption::{decrypt, encrypt, EncryptionKey, Nonce, NONCE_SIZE, TAG_SIZE};
use super::kdf::KeyPurpose;
use crate::error::{Error, Result};

/// Prefix identifying the current envelope format
pub const ENVELOPE_PREFIX: &str = "AIXS_V3:";

/// Metadata carried in clear in front of the ciphertext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Key version at sealing time
    #[serde(rename = "v")]
    pub key_version: u32,
    /// Purpose the data was sealed for
    #[serde(rename = "p")]
    pub purpose: KeyPurpose,
}

/// Seal `plaintext` into an envelope string
pub fn seal(
    key: &EncryptionKey,
    purpose: KeyPurpose,
    key_version: u32,
    plaintext: &[u8],
) -> Result<String> {
    let header = EnvelopeHeader {
        key_version,
        purpose,
    };
    let header_b64 = STANDARD.encode(serde_json::to_vec(&header)?);

    let (nonce, ciphertext) = encrypt(key, plaintext, header_b64.as_bytes())?;

    let mut body = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    body.extend_from_slice(nonce.as_bytes());
    body.extend_from_slice(&ciphertext);

    Ok(format!("{}{}:{}", ENVELOPE_PREFIX, header_b64, STANDARD.encode(body)))
}

/// Open an envelope sealed for `expected`
///
/// Fails with `PurposeMismatch` before touching the ciphertext when the
/// header names another purpose.
pub fn open(key: &EncryptionKey, expected: KeyPurpose, envelope: &str) -> Result<Vec<u8>> {
    let (header_b64, header, body_b64) = split(envelope)?;

    if header.purpose != expected {
        return Err(Error::PurposeMismatch {
            expected: expected.to_string(),
            found: header.purpose.to_string(),
        });
    }

    let body = STANDARD
        .decode(body_b64)
        .map_err(|e| Error::InvalidEnvelope(format!("Bad body encoding: {}", e)))?;
    if body.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::InvalidEnvelope("Envelope body too short".into()));
    }

    let (nonce_bytes, ciphertext) = body.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);

    decrypt(key, &Nonce::from_bytes(nonce), ciphertext, header_b64.as_bytes())
}

/// Read the header without decrypting
pub fn peek_header(envelope: &str) -> Result<EnvelopeHeader> {
    split(envelope).map(|(_, header, _)| header)
}

fn split(envelope: &str) -> Result<(&str, EnvelopeHeader, &str)> {
    let rest = envelope
        .strip_prefix(ENVELOPE_PREFIX)
        .ok_or_else(|| Error::InvalidEnvelope("Missing envelope prefix".into()))?;

    let (header_b64, body_b64) = rest
        .split_once(':')
        .ok_or_else(|| Error::InvalidEnvelope("Missing header separator".into()))?;

    let header_json = STANDARD
        .decode(header_b64)
        .map_err(|e| Error::InvalidEnvelope(format!("Bad header encoding: {}", e)))?;
    let header: EnvelopeHeader = serde_json::from_slice(&header_json)
        .map_err(|e| Error::InvalidEnvelope(format!("Bad header: {}", e)))?;

    Ok((header_b64, header, body_b64))
}
