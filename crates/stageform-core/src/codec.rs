//! Envelope parsing and the payload transport encoding.
//!
//! Payloads travel as standard (padded) base64 over a JSON document. A payload
//! may also arrive as plain structured JSON; [`normalize_payload`] encodes it
//! first so both shapes go through the same decode path.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::{DeserializeOwned, Error as _, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use crate::errors::CodecError;
use crate::stage::EnvelopeKind;

/// One inbound unit of work: `{"type": string, "data": any}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub tag: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(tag: impl Into<String>, data: Value) -> Self {
        Self {
            tag: tag.into(),
            data,
        }
    }

    /// Parse and validate an envelope from its JSON text.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let envelope: Self = serde_json::from_str(text).map_err(CodecError::Document)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Both fields are required; an empty tag or a null payload counts as absent.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.tag.is_empty() {
            return Err(CodecError::MissingField("type"));
        }
        if self.data.is_null() {
            return Err(CodecError::MissingField("data"));
        }
        Ok(())
    }

    pub fn kind(&self) -> EnvelopeKind {
        EnvelopeKind::from_tag(&self.tag)
    }
}

/// Serialize a value to JSON and base64-encode it.
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    let json = serde_json::to_vec(value).map_err(CodecError::Encode)?;
    Ok(STANDARD.encode(json))
}

/// Reverse [`encode_payload`] into the target schema.
///
/// Payload documents are records: anything other than a JSON object is a
/// schema mismatch, even when the target type could be read positionally.
pub fn decode_payload<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    let bytes = STANDARD.decode(text.trim())?;
    let document: Value = serde_json::from_slice(&bytes).map_err(CodecError::Document)?;
    if !document.is_object() {
        return Err(CodecError::Document(not_a_record(&document)));
    }
    serde_json::from_value(document).map_err(CodecError::Document)
}

/// `deserialize_with` helper for nested record fields; rejects sequences.
pub fn deserialize_record<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Err(D::Error::invalid_type(unexpected(&value), &"a JSON object"));
    }
    serde_json::from_value(value).map_err(D::Error::custom)
}

fn not_a_record(value: &Value) -> serde_json::Error {
    serde_json::Error::invalid_type(unexpected(value), &"a JSON object")
}

fn unexpected(value: &Value) -> Unexpected<'_> {
    match value {
        Value::Null => Unexpected::Unit,
        Value::Bool(b) => Unexpected::Bool(*b),
        Value::Number(_) => Unexpected::Other("number"),
        Value::String(s) => Unexpected::Str(s),
        Value::Array(_) => Unexpected::Seq,
        Value::Object(_) => Unexpected::Map,
    }
}

/// Decode an envelope payload that is either pre-encoded text or structured JSON.
pub fn normalize_payload<T: DeserializeOwned>(data: &Value) -> Result<T, CodecError> {
    match data {
        Value::String(text) => decode_payload(text),
        other => decode_payload(&encode_payload(other)?),
    }
}

/// Text rendering stored in a session's accumulator (one-space indented JSON).
pub fn render_payload<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b" "));
    value.serialize(&mut ser).map_err(CodecError::Encode)?;
    // serde_json only ever writes UTF-8
    Ok(String::from_utf8_lossy(&out).into_owned())
}
