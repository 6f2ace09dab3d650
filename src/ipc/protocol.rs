//! IPC message envelope and line codec
//!
//! One message is one line of compact UTF-8 JSON with camelCase field
//! names. Reading is lenient about key casing so peers that write
//! `{"Id":1,"Message":"hi"}` are understood too.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::{Error, Result};

/// A JSON payload that carries an id and a text body
///
/// Implement this for richer payload types; they may add any fields of
/// their own next to `id` and `message`.
pub trait Envelope: Serialize + DeserializeOwned + Send + Sync {
    /// Caller-assigned id, not required to be unique
    fn id(&self) -> i64;

    /// Text body
    fn message(&self) -> &str;
}

/// The minimal message envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: i64,
    message: String,
}

impl Message {
    /// Create a new message
    pub fn new(id: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
        }
    }

    /// Consume the message, returning its body
    pub fn into_message(self) -> String {
        self.message
    }
}

impl Envelope for Message {
    fn id(&self) -> i64 {
        self.id
    }

    fn message(&self) -> &str {
        &self.message
    }
}

/// Encode a value as a single compact JSON line (without the terminator)
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode one JSON line into `T`
///
/// A `null` document yields [`Error::EmptyPayload`]. When the value does not
/// fit `T` as written, keys are normalized to camelCase and decoding is
/// retried; the original error is reported if that fails too.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Error::EmptyPayload);
    }

    let value: Value = serde_json::from_str(line)?;
    if value.is_null() {
        return Err(Error::EmptyPayload);
    }

    match T::deserialize(&value) {
        Ok(decoded) => Ok(decoded),
        Err(first) => {
            let normalized = normalize_keys(value);
            T::deserialize(&normalized).map_err(|_| Error::Json(first))
        }
    }
}

/// Rewrite object keys (recursively) into camelCase
fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (camel_case(&key), normalize_keys(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

/// `ID` -> `id`, `MessageId` -> `messageId`
fn camel_case(key: &str) -> String {
    if !key.chars().any(|c| c.is_lowercase()) {
        return key.to_lowercase();
    }
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Progress {
        id: i64,
        message: String,
        percent_done: u8,
    }

    impl Envelope for Progress {
        fn id(&self) -> i64 {
            self.id
        }

        fn message(&self) -> &str {
            &self.message
        }
    }

    #[test]
    fn test_encode_is_compact_camel_case() {
        let json = encode(&Message::new(7, "hello")).unwrap();
        assert_eq!(json, r#"{"id":7,"message":"hello"}"#);

        let json = encode(&Progress {
            id: 1,
            message: "copy".to_string(),
            percent_done: 40,
        })
        .unwrap();
        assert_eq!(json, r#"{"id":1,"message":"copy","percentDone":40}"#);
    }

    #[test]
    fn test_decode_pascal_case() {
        let msg: Message = decode(r#"{"Id":3,"Message":"from a PascalCase peer"}"#).unwrap();
        assert_eq!(msg.id(), 3);
        assert_eq!(msg.message(), "from a PascalCase peer");

        let progress: Progress =
            decode(r#"{"ID":9,"Message":"copy","PercentDone":75}"#).unwrap();
        assert_eq!(progress.percent_done, 75);
    }

    #[test]
    fn test_decode_null_is_empty_payload() {
        let err = decode::<Message>("null").unwrap_err();
        assert!(matches!(err, Error::EmptyPayload));
        let err = decode::<Message>("   ").unwrap_err();
        assert!(matches!(err, Error::EmptyPayload));
    }

    #[test]
    fn test_decode_reports_original_error() {
        let err = decode::<Message>(r#"{"id":"not a number","message":"x"}"#).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("ID"), "id");
        assert_eq!(camel_case("Message"), "message");
        assert_eq!(camel_case("PercentDone"), "percentDone");
        assert_eq!(camel_case("already"), "already");
        assert_eq!(camel_case(""), "");
    }
}
