//! JSON-RPC 2.0 ids and message classification.
//!
//! The gateway correlates backend responses to in-flight callers purely
//! by id, so ids must be hashable map keys with a serialization that
//! matches the wire exactly (integer, string, or null; never floats,
//! booleans, arrays, or objects).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A JSON-RPC 2.0 request/response id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer id (e.g. `"id": 1`). The handshake uses the literal `1`.
    Number(i64),
    /// String id (e.g. `"id": "8f4b…"`). Dispatch mints UUID strings.
    String(String),
    /// Explicit null id. Valid but unusual.
    Null,
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_id(&value).map_err(|_| {
            serde::de::Error::custom("JSON-RPC id must be an integer, string, or null")
        })
    }
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonRpcId::Number(n) => write!(f, "{n}"),
            JsonRpcId::String(s) => write!(f, "{s}"),
            JsonRpcId::Null => write!(f, "null"),
        }
    }
}

/// Parse a JSON value into a [`JsonRpcId`].
///
/// Accepts integers, strings, and null. Floats, booleans, arrays, and
/// objects are rejected.
pub fn parse_id(value: &Value) -> Result<JsonRpcId, InvalidId> {
    match value {
        Value::Number(n) => n.as_i64().map(JsonRpcId::Number).ok_or(InvalidId),
        Value::String(s) => Ok(JsonRpcId::String(s.clone())),
        Value::Null => Ok(JsonRpcId::Null),
        _ => Err(InvalidId),
    }
}

/// The `id` field was present but not an integer, string, or null.
#[derive(Debug, thiserror::Error)]
#[error("invalid JSON-RPC id field")]
pub struct InvalidId;

/// Classification of a parsed JSON-RPC message by its `id`/`method`
/// fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Has both `id` and `method`: expects a response.
    Request { id: JsonRpcId, method: String },
    /// Has `id` but no `method`: a response to an earlier request.
    Response { id: JsonRpcId },
    /// Has `method` but no `id`: fire-and-forget.
    Notification { method: String },
}

/// Classify a parsed JSON-RPC value.
///
/// # Errors
///
/// Returns [`ClassifyError`] when the `jsonrpc` field is missing or not
/// `"2.0"`, the `id` is an invalid type, or neither `id` nor `method`
/// is present.
pub fn classify(value: &Value) -> Result<MessageKind, ClassifyError> {
    let version = value.get("jsonrpc").and_then(|v| v.as_str());
    if version != Some("2.0") {
        return Err(ClassifyError::InvalidVersion);
    }

    let id = value
        .get("id")
        .map(parse_id)
        .transpose()
        .map_err(|_| ClassifyError::InvalidId)?;
    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .map(String::from);

    match (id, method) {
        (Some(id), Some(method)) => Ok(MessageKind::Request { id, method }),
        (Some(id), None) => Ok(MessageKind::Response { id }),
        (None, Some(method)) => Ok(MessageKind::Notification { method }),
        (None, None) => Err(ClassifyError::Unclassifiable),
    }
}

/// Errors from [`classify`].
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// The `jsonrpc` field is missing or not `"2.0"`.
    #[error("missing or invalid jsonrpc version field")]
    InvalidVersion,
    /// The `id` field is present but not a valid JSON-RPC id.
    #[error("invalid id field")]
    InvalidId,
    /// Neither `id` nor `method` is present.
    #[error("message has neither id nor method")]
    Unclassifiable,
}
