//! # Document Schema
//!
//! Storage key names and the migration chain for the config document.
//!
//! ## Schema History
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CONFIG DOCUMENT VERSIONS                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  v1 (legacy, no profiles)          v2 (current)                         │
//! │  ┌──────────────────────┐          ┌──────────────────────────────┐     │
//! │  │ provider             │          │ version: 2                   │     │
//! │  │ apiKey               │  ──────► │ activeProfileId              │     │
//! │  │ baseURL?             │          │ profiles: [ { id, name,      │     │
//! │  │ model                │          │   config, pricing?, lastTest?│     │
//! │  │ generationParams?    │          │   createdAt, updatedAt } ]   │     │
//! │  └──────────────────────┘          └──────────────────────────────┘     │
//! │                                                                         │
//! │  Early profile documents also carried `version: 1`; those are          │
//! │  recognized by their `profiles` array and only get their timestamps    │
//! │  and active id repaired.                                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Migrations operate on `serde_json::Value` so they never depend on the
//! current Rust types being able to decode old shapes.

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// Current schema version
pub const SCHEMA_VERSION: u32 = 2;

/// Key names in the key-value store
pub mod keys {
    /// The encrypted config document
    pub const CONFIG: &str = "aixs_config";

    /// The config document sealed under a new key while a re-key is in
    /// progress. Only present if a re-key was interrupted.
    pub const CONFIG_REKEY: &str = "aixs_config_rekey";

    /// Hex salt for password stretching
    pub const SALT: &str = "aixs_key_salt";

    /// Key version, bumped on every password change
    pub const KEY_VERSION: &str = "aixs_key_version";

    /// "true" once the user has set their own password
    pub const HAS_CUSTOM_PASSWORD: &str = "aixs_has_custom_password";

    /// Encrypted check value for password verification
    pub const KEY_CHECK: &str = "aixs_key_check";

    /// Prefix for pre-migration backups; the source version is appended
    pub const CONFIG_BACKUP_PREFIX: &str = "aixs_config_backup_v";
}

/// Backup key for a blob that was at `version` before migrating
pub fn backup_key(version: u32) -> String {
    format!("{}{}", keys::CONFIG_BACKUP_PREFIX, version)
}

/// Schema version of a decoded document
///
/// A missing `version` means the legacy flat shape (v1).
pub fn document_version(value: &Value) -> u32 {
    value
        .get("version")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(1)
}

/// Bring `value` up to [`SCHEMA_VERSION`]
///
/// Runs each step in order. A document already at (or past) the current
/// version is returned unchanged.
pub fn migrate(mut value: Value) -> Result<Value> {
    let mut version = document_version(&value);

    while version < SCHEMA_VERSION {
        value = match version {
            1 => migrate_v1_to_v2(value)?,
            other => {
                return Err(Error::MigrationFailed {
                    from: other,
                    reason: "no migration step registered".into(),
                })
            }
        };
        let next = document_version(&value);
        if next <= version {
            return Err(Error::MigrationFailed {
                from: version,
                reason: "migration step did not advance the version".into(),
            });
        }
        tracing::info!("Migrated config document v{} -> v{}", version, next);
        version = next;
    }

    Ok(value)
}

/// v1 → v2: wrap a legacy flat config in a profile list
fn migrate_v1_to_v2(value: Value) -> Result<Value> {
    let fail = |reason: &str| Error::MigrationFailed {
        from: 1,
        reason: reason.to_string(),
    };

    let Value::Object(mut doc) = value else {
        return Err(fail("document is not an object"));
    };

    let now = crate::time::now_rfc3339();

    if let Some(Value::Array(profiles)) = doc.get_mut("profiles") {
        for profile in profiles.iter_mut() {
            let Value::Object(profile) = profile else {
                return Err(fail("profile entry is not an object"));
            };
            if !profile.contains_key("id") {
                return Err(fail("profile entry has no id"));
            }
            profile
                .entry("createdAt")
                .or_insert_with(|| Value::String(now.clone()));
            let created = profile.get("createdAt").cloned().unwrap_or(Value::Null);
            profile.entry("updatedAt").or_insert(created);
        }

        let first_id = profiles
            .first()
            .and_then(|p| p.get("id"))
            .cloned()
            .unwrap_or(Value::Null);
        let active_ok = match doc.get("activeProfileId") {
            Some(Value::String(active)) => doc
                .get("profiles")
                .and_then(Value::as_array)
                .is_some_and(|ps| ps.iter().any(|p| p.get("id") == Some(&json!(active)))),
            _ => false,
        };
        if !active_ok {
            doc.insert("activeProfileId".into(), first_id);
        }

        doc.insert("version".into(), json!(2));
        return Ok(Value::Object(doc));
    }

    if !doc.contains_key("provider") || !doc.contains_key("model") {
        return Err(fail("legacy config is missing provider or model"));
    }

    doc.remove("version");
    let id = format!("cfg_{}_legacy", crate::time::now_timestamp_millis());

    let mut profile = Map::new();
    profile.insert("id".into(), json!(id));
    profile.insert("name".into(), json!("Default profile"));
    profile.insert("config".into(), Value::Object(doc));
    profile.insert("createdAt".into(), json!(now));
    profile.insert("updatedAt".into(), json!(now));

    Ok(json!({
        "version": 2,
        "activeProfileId": id,
        "profiles": [Value::Object(profile)],
    }))
}

// ============================================================================
// TESTS
// ============================================================================
