//! Partial-update patches and how they combine.

use serde_json::{Map, Value};

/// A partial update: field name to new value
pub type Patch = Map<String, Value>;

/// The one field whose object value is merged key-by-key instead of replaced
pub const DEEP_MERGE_FIELD: &str = "contextSummary";

/// Fold `newer` into `base`
///
/// Every field of `newer` overwrites the same field of `base`, except
/// [`DEEP_MERGE_FIELD`]: when both sides hold objects, their keys are
/// merged one level deep with `newer` winning per key.
pub fn merge_patch(base: &mut Patch, newer: Patch) {
    for (field, value) in newer {
        if field == DEEP_MERGE_FIELD {
            if let (Some(Value::Object(existing)), Value::Object(incoming)) =
                (base.get_mut(&field), &value)
            {
                for (k, v) in incoming {
                    existing.insert(k.clone(), v.clone());
                }
                continue;
            }
        }
        base.insert(field, value);
    }
}

/// `newer` folded over `older`, by value
pub fn merged(mut older: Patch, newer: Patch) -> Patch {
    merge_patch(&mut older, newer);
    older
}
