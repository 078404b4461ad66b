//! Format decoders turning raw source bytes into partial configurations.
//!
//! Decoders must populate only the fields present in the input and leave
//! absent fields at their zero value, which is what makes the merge engine's
//! zero-never-overrides rule meaningful. The built-in decoders guarantee this
//! by parsing to a value tree and overlaying it onto the serialized zero
//! instance of the target type, so partial documents decode without any
//! `#[serde(default)]` annotations on the configuration type.

use std::str;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{error::BoxError, merge};

/// Converts raw bytes into a structured partial configuration.
pub trait Decoder<T>: Send + Sync {
    /// Decodes `data` into a fresh instance of the configuration type.
    ///
    /// Fields absent from the input must remain at their zero value.
    ///
    /// # Errors
    /// Returns the underlying parse failure; the manager aborts the reload
    /// and surfaces it as [`ConfigError::Decode`](crate::ConfigError::Decode).
    fn decode(&self, data: &[u8]) -> Result<T, BoxError>;
}

/// Overlays a parsed document onto the zero instance of `T`.
fn fill_zero_instance<T>(parsed: Value) -> Result<T, BoxError>
where
    T: Default + Serialize + DeserializeOwned,
{
    let mut base = serde_json::to_value(T::default())?;
    merge::overlay(&mut base, parsed);
    Ok(serde_json::from_value(base)?)
}

/// Decodes JSON documents via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl JsonDecoder {
    /// Creates a JSON decoder.
    pub fn new() -> Self {
        Self
    }
}

impl<T> Decoder<T> for JsonDecoder
where
    T: Default + Serialize + DeserializeOwned,
{
    fn decode(&self, data: &[u8]) -> Result<T, BoxError> {
        let parsed: Value = serde_json::from_slice(data)?;
        fill_zero_instance(parsed)
    }
}

/// Decodes TOML documents via the `toml` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlDecoder;

impl TomlDecoder {
    /// Creates a TOML decoder.
    pub fn new() -> Self {
        Self
    }
}

impl<T> Decoder<T> for TomlDecoder
where
    T: Default + Serialize + DeserializeOwned,
{
    fn decode(&self, data: &[u8]) -> Result<T, BoxError> {
        let text = str::from_utf8(data)?;
        let parsed: toml::Value = toml::from_str(text)?;
        fill_zero_instance(serde_json::to_value(parsed)?)
    }
}

/// Decodes `KEY=VALUE` lines, as produced by
/// [`EnvSource`](crate::source::EnvSource).
///
/// Keys are lowercased to match field names; `__` separates nesting levels
/// (`SERVER__PORT=8080` targets `server.port`). Values are coerced against
/// the zero instance's field kinds, so `PORT=8080` becomes a number for a
/// numeric field and stays a string for a string field; comma-separated
/// values fill sequence fields. Lines without `=` are skipped.
#[derive(Debug, Clone, Default)]
pub struct EnvDecoder {
    prefix: Option<String>,
}

impl EnvDecoder {
    /// Creates a decoder considering every variable.
    pub fn new() -> Self {
        Self { prefix: None }
    }

    /// Creates a decoder that only considers variables starting with
    /// `prefix` and strips it before matching field names.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl<T> Decoder<T> for EnvDecoder
where
    T: Default + Serialize + DeserializeOwned,
{
    fn decode(&self, data: &[u8]) -> Result<T, BoxError> {
        let text = String::from_utf8_lossy(data);
        let mut base = serde_json::to_value(T::default())?;

        for line in text.lines() {
            let Some((name, raw_value)) = line.split_once('=') else {
                continue;
            };
            let name = match &self.prefix {
                Some(prefix) => match name.strip_prefix(prefix.as_str()) {
                    Some(stripped) => stripped,
                    None => continue,
                },
                None => name,
            };
            if name.is_empty() {
                continue;
            }

            let path: Vec<String> = name
                .to_lowercase()
                .split("__")
                .map(str::to_owned)
                .collect();
            assign(&mut base, &path, raw_value);
        }

        Ok(serde_json::from_value(base)?)
    }
}

/// Writes `raw` at `path` inside the value tree, creating intermediate maps.
fn assign(base: &mut Value, path: &[String], raw: &str) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    let Value::Object(map) = base else {
        return;
    };

    if rest.is_empty() {
        let coerced = match map.get(first) {
            Some(slot) => coerce(raw, slot),
            None => guess_scalar(raw),
        };
        map.insert(first.clone(), coerced);
        return;
    }

    let slot = map
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if slot.is_null() {
        // Unset Option field holding a nested struct.
        *slot = Value::Object(Map::new());
    }
    assign(slot, rest, raw);
}

/// Coerces a raw string against the kind of the field it targets.
fn coerce(raw: &str, slot: &Value) -> Value {
    match slot {
        Value::String(_) => Value::String(raw.to_owned()),
        Value::Bool(_) => raw
            .parse::<bool>()
            .map(Value::Bool)
            .unwrap_or_else(|_| Value::String(raw.to_owned())),
        Value::Number(number) if number.is_f64() => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_owned())),
        Value::Number(_) => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| guess_scalar(raw)),
        Value::Array(_) => {
            if raw.is_empty() {
                Value::Array(Vec::new())
            } else {
                Value::Array(raw.split(',').map(guess_scalar).collect())
            }
        }
        Value::Null | Value::Object(_) => guess_scalar(raw),
    }
}

/// Best-effort scalar typing for fields whose kind is unknown.
fn guess_scalar(raw: &str) -> Value {
    if let Ok(flag) = raw.parse::<bool>() {
        return Value::Bool(flag);
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(raw.to_owned())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Inner {
        port: u16,
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        int: i64,
        string: String,
        flag: bool,
        seq: Vec<String>,
        inner: Inner,
        inner_opt: Option<Inner>,
    }

    #[test]
    fn json_partial_document_leaves_absent_fields_zero() {
        let decoded: Sample = JsonDecoder::new().decode(b"{\"int\": 10}").unwrap();

        assert_eq!(decoded.int, 10);
        assert_eq!(decoded.string, "");
        assert_eq!(decoded.inner, Inner::default());
    }

    #[test]
    fn json_nested_partial_document() {
        let decoded: Sample = JsonDecoder::new()
            .decode(b"{\"inner\": {\"port\": 8080}}")
            .unwrap();

        assert_eq!(decoded.inner.port, 8080);
        assert_eq!(decoded.int, 0);
    }

    #[test]
    fn json_invalid_document_errors() {
        let result: Result<Sample, _> = JsonDecoder::new().decode(b"{not json");
        assert!(result.is_err());
    }

    #[test]
    fn toml_partial_document_leaves_absent_fields_zero() {
        let decoded: Sample = TomlDecoder::new()
            .decode(b"string = \"from-toml\"\n\n[inner]\nport = 9090\n")
            .unwrap();

        assert_eq!(decoded.string, "from-toml");
        assert_eq!(decoded.inner.port, 9090);
        assert_eq!(decoded.int, 0);
    }

    #[test]
    fn env_lines_are_coerced_against_field_kinds() {
        let decoded: Sample = EnvDecoder::new()
            .decode(b"INT=1\nSTRING=hello\nFLAG=true\nSEQ=a,b\n")
            .unwrap();

        assert_eq!(decoded.int, 1);
        assert_eq!(decoded.string, "hello");
        assert!(decoded.flag);
        assert_eq!(decoded.seq, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn env_numeric_looking_value_stays_string_for_string_field() {
        let decoded: Sample = EnvDecoder::new().decode(b"STRING=8080\n").unwrap();
        assert_eq!(decoded.string, "8080");
    }

    #[test]
    fn env_double_underscore_targets_nested_fields() {
        let decoded: Sample = EnvDecoder::new()
            .decode(b"INNER__PORT=8080\nINNER_OPT__PORT=9090\n")
            .unwrap();

        assert_eq!(decoded.inner.port, 8080);
        assert_eq!(decoded.inner_opt, Some(Inner { port: 9090 }));
    }

    #[test]
    fn env_prefix_filters_and_strips() {
        let decoded: Sample = EnvDecoder::with_prefix("APP_")
            .decode(b"APP_INT=7\nINT=3\nOTHER_STRING=nope\n")
            .unwrap();

        assert_eq!(decoded.int, 7);
        assert_eq!(decoded.string, "");
    }

    #[test]
    fn env_malformed_and_unknown_lines_are_skipped() {
        let decoded: Sample = EnvDecoder::new()
            .decode(b"no-equals-sign\nUNKNOWN=1\nINT=4\n")
            .unwrap();

        assert_eq!(decoded.int, 4);
    }
}
