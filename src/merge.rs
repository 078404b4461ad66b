//! Generic structural merge for configuration types.
//!
//! Both sides are serialized to [`serde_json::Value`] and the incoming value is
//! overlaid onto the accumulator field-by-field. The overlay rule is the one
//! partial configurations need: a non-zero incoming value overwrites, a
//! zero-valued incoming field (the decoder's marker for "absent") never erases
//! data an earlier loader already contributed.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::MergeError;

/// Deep-merges `incoming` into `accumulator`.
///
/// Rules, applied recursively:
/// - scalar fields: non-zero incoming wins, zero incoming is ignored
/// - maps and nested structs: key-wise overlay, untouched keys preserved,
///   an empty incoming map never erases
/// - sequences: a non-empty incoming sequence replaces the accumulator's
///   wholesale, an empty one is ignored
/// - `Option` fields: incoming `Some` overrides `None`; two `Some` maps recurse
///
/// The accumulator is only rewritten after the whole overlay succeeded.
///
/// # Errors
/// Returns [`MergeError::NotAStruct`] if either side does not serialize to a
/// map of fields, and [`MergeError::Serialize`]/[`MergeError::Deserialize`] if
/// the round-trip through the value representation fails.
pub fn structural_merge<T>(accumulator: &mut T, incoming: T) -> Result<(), MergeError>
where
    T: Serialize + DeserializeOwned,
{
    let mut base = serde_json::to_value(&*accumulator).map_err(MergeError::Serialize)?;
    let overlay_value = serde_json::to_value(&incoming).map_err(MergeError::Serialize)?;

    if !base.is_object() {
        return Err(MergeError::NotAStruct {
            kind: value_kind(&base),
        });
    }
    if !overlay_value.is_object() {
        return Err(MergeError::NotAStruct {
            kind: value_kind(&overlay_value),
        });
    }

    overlay(&mut base, overlay_value);

    *accumulator = serde_json::from_value(base).map_err(MergeError::Deserialize)?;
    Ok(())
}

/// Overlays `incoming` onto `base` following the structural merge rules.
///
/// Also used by the built-in decoders to fill a parsed partial document onto
/// the zero instance of the configuration type.
pub(crate) fn overlay(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, incoming) => {
            if !is_zero(&incoming) {
                *slot = incoming;
            }
        }
    }
}

/// Whether a value counts as "zero" for override purposes.
///
/// Objects are handled by the key-wise branch of [`overlay`] and only reach a
/// scalar slot when the accumulator side is `null` (an unset `Option`), where
/// a present nested value must win.
pub(crate) fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n == 0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(_) => false,
    }
}

/// Whether a serialized configuration instance is entirely zero-valued,
/// fields recursed. Used by the manager's constructor pre-flight check.
pub(crate) fn is_zero_instance(value: &Value) -> bool {
    match value {
        Value::Object(fields) => fields.values().all(is_zero_instance),
        other => is_zero(other),
    }
}

/// Human-readable kind of a serialized value, for error messages.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a map",
    }
}
