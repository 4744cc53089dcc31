//! Best-effort decoding of the `data` column.
//!
//! Rows written over the years carry different encodings: JSON documents,
//! pickled objects stored as latin-1 text, pickled objects stored as raw bytes,
//! and plain strings. Decoding never fails; an undecodable row degrades to a
//! literal string or to [`UNKNOWN_BINARY`].

mod nesting;

use serde_json::{Map, Number, Value};
use serde_pickle::{DeOptions, HashableValue, Value as PickleValue};
use tracing::debug;

/// Shown in place of a binary payload that could not be decoded.
pub const UNKNOWN_BINARY: &str = "<unknown binary data>";

/// Deepest legacy container nesting that is decoded. Matches serde_json's
/// recursion limit.
pub const MAX_NESTING: usize = 128;

/// Raw column value, classified by storage class.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Structured(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Classify a TEXT value. JSON documents are structured, except JSON
    /// strings, whose inner text may itself be a legacy encoding.
    pub fn from_text(raw: String) -> Self {
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::String(inner)) => Payload::Text(inner),
            Ok(value) => Payload::Structured(value),
            Err(_) => Payload::Text(raw),
        }
    }
}

/// Capability to decode the legacy object-serialization format.
/// Returns `None` when the bytes are not a valid encoding.
pub trait LegacyDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Option<Value>;
}

/// [`LegacyDecoder`] for Python pickles.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickleDecoder;

impl LegacyDecoder for PickleDecoder {
    fn decode(&self, bytes: &[u8]) -> Option<Value> {
        match nesting::pickle_depth(bytes) {
            Some(depth) if depth <= MAX_NESTING => {}
            depth => {
                debug!(?depth, "pickle refused before decoding");
                return None;
            }
        }
        match serde_pickle::value_from_slice(bytes, DeOptions::new()) {
            Ok(value) => pickle_to_json(value, 0),
            Err(err) => {
                debug!(%err, "payload is not a pickle");
                None
            }
        }
    }
}

/// Decode a payload for display. Structured values pass through untouched;
/// text that is not a legacy encoding is a plain string; bytes that are not a
/// legacy encoding become [`UNKNOWN_BINARY`].
pub fn decode(payload: Payload, legacy: &dyn LegacyDecoder) -> Value {
    match payload {
        Payload::Structured(value) => value,
        Payload::Text(text) => latin1_bytes(&text)
            .and_then(|bytes| legacy.decode(&bytes))
            .unwrap_or(Value::String(text)),
        Payload::Binary(bytes) => legacy.decode(&bytes).unwrap_or_else(|| {
            debug!(len = bytes.len(), "undecodable binary payload");
            Value::String(UNKNOWN_BINARY.to_string())
        }),
    }
}

/// JSON written back when an item is requeued. Text keeps its original form so
/// a pickle-text queue stays readable by its consumers.
pub fn reencode(payload: Payload, legacy: &dyn LegacyDecoder) -> Value {
    match payload {
        Payload::Text(text) => Value::String(text),
        other => decode(other, legacy),
    }
}

/// One byte per char; `None` if any char is outside latin-1.
fn latin1_bytes(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}

/// `None` once nesting passes [`MAX_NESTING`].
fn pickle_to_json(value: PickleValue, depth: usize) -> Option<Value> {
    if depth > MAX_NESTING {
        return None;
    }
    let nested = |item: PickleValue| pickle_to_json(item, depth + 1);
    Some(match value {
        PickleValue::None => Value::Null,
        PickleValue::Bool(b) => Value::Bool(b),
        PickleValue::I64(n) => Value::from(n),
        PickleValue::Int(n) => Value::String(n.to_string()),
        PickleValue::F64(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        PickleValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        PickleValue::String(s) => Value::String(s),
        PickleValue::List(items) | PickleValue::Tuple(items) => {
            Value::Array(items.into_iter().map(nested).collect::<Option<_>>()?)
        }
        PickleValue::Set(items) | PickleValue::FrozenSet(items) => Value::Array(
            items
                .into_iter()
                .map(|item| nested(item.into_value()))
                .collect::<Option<_>>()?,
        ),
        PickleValue::Dict(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                map.insert(dict_key(key, depth)?, nested(value)?);
            }
            Value::Object(map)
        }
    })
}

fn dict_key(key: HashableValue, depth: usize) -> Option<String> {
    match key {
        HashableValue::String(s) => Some(s),
        other => pickle_to_json(other.into_value(), depth + 1).map(|v| v.to_string()),
    }
}
