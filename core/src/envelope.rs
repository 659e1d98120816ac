use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BusError, Result};

/// Structured event payload. Always a keyed JSON object, never a scalar.
pub type Payload = serde_json::Map<String, Value>;

/// Wire field names of the structured envelope.
pub mod keys {
    /// Logical connection identifier pairing two endpoints
    pub const CONNECTION_ID: &str = "connectionID";
    /// Event name the receiver dispatches under
    pub const TYPE: &str = "type";
    /// Keyed payload, or `null`
    pub const DATA: &str = "data";
}

/// Structured wrapper around one logical event on the wire.
///
/// Serializes as `{ "connectionID": string|null, "type": string, "data": object|null }`.
/// Absent fields are written as `null` so the shape is stable for every sender.
///
/// # Examples
///
/// ```
/// use framebus_core::Envelope;
///
/// let env = Envelope::new(Some("svc1".into()), "hello", None);
/// let wire = serde_json::to_string(&env).unwrap();
/// assert_eq!(wire, r#"{"connectionID":"svc1","type":"hello","data":null}"#);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Connection identifier of the sending endpoint, if it has one
    #[serde(rename = "connectionID", default)]
    pub connection_id: Option<String>,
    /// Event name
    #[serde(rename = "type")]
    pub event_type: String,
    /// Keyed payload
    #[serde(default)]
    pub data: Option<Payload>,
}

impl Envelope {
    pub fn new(
        connection_id: Option<String>,
        event_type: impl Into<String>,
        data: Option<Payload>,
    ) -> Self {
        Self {
            connection_id,
            event_type: event_type.into(),
            data,
        }
    }
}

/// Result of decoding an inbound wire string.
///
/// Decoding never fails hard: anything that is not a well-formed envelope
/// comes back as [`Decoded::Raw`] so the caller can reroute it to the raw
/// `"message"` channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Envelope(Envelope),
    Raw(DecodeFailure),
}

impl Decoded {
    pub fn is_envelope(&self) -> bool {
        matches!(self, Decoded::Envelope(_))
    }
}

/// An inbound payload that could not be read as an [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    /// The inbound string, verbatim
    pub wire: String,
    /// Parser diagnostic, for logging only
    pub reason: String,
}

impl DecodeFailure {
    /// Parses the verbatim payload as arbitrary JSON.
    ///
    /// Returns `None` when the payload is not JSON at all.
    pub fn raw_json(&self) -> Option<Value> {
        serde_json::from_str(&self.wire).ok()
    }
}

/// Encodes and decodes envelopes to and from transportable strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self
    }

    /// Builds and serializes an envelope.
    ///
    /// `data` must be a JSON object or absent; `Some(Value::Null)` counts as
    /// absent. Any other value fails with [`BusError::InvalidPayloadKind`].
    ///
    /// # Examples
    ///
    /// ```
    /// use framebus_core::{BusError, EnvelopeCodec};
    /// use serde_json::json;
    ///
    /// let codec = EnvelopeCodec::new();
    /// assert!(codec.encode(None, "hi", Some(json!({"a": 1}))).is_ok());
    /// assert!(matches!(
    ///     codec.encode(None, "hi", Some(json!("a string"))),
    ///     Err(BusError::InvalidPayloadKind { kind: "string" })
    /// ));
    /// ```
    pub fn encode(
        &self,
        connection_id: Option<&str>,
        event_type: &str,
        data: Option<Value>,
    ) -> Result<String> {
        let envelope = Envelope::new(
            connection_id.map(str::to_owned),
            event_type,
            payload_from_value(data)?,
        );
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Serializes any value with no envelope around it.
    pub fn encode_raw<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    /// Attempts a structured decode, falling back to [`Decoded::Raw`].
    ///
    /// Valid JSON that lacks a string `type` field, or whose `data` is not an
    /// object, is treated the same as malformed text.
    pub fn decode(&self, wire: &str) -> Decoded {
        match serde_json::from_str::<Envelope>(wire) {
            Ok(envelope) => Decoded::Envelope(envelope),
            Err(e) => Decoded::Raw(DecodeFailure {
                wire: wire.to_owned(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Narrows an optional JSON value to an optional keyed payload.
pub fn payload_from_value(value: Option<Value>) -> Result<Option<Payload>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(BusError::InvalidPayloadKind {
            kind: value_kind(&other),
        }),
    }
}

/// Short JSON type name used in error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
