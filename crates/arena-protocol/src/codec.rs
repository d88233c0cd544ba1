//! JSON text ⇄ [`Message`].
//!
//! Decoding runs in two steps. First the text is parsed into a generic
//! JSON object and its `"type"` field is read; that tells us which shape
//! to expect. Then the registry's decoder for that shape validates the
//! remaining fields. Splitting it this way lets every failure be
//! classified as a [`DecodeError`] kind, which a single
//! `serde_json::from_str::<Message>` call could not do.

use serde_json::Value;

use crate::error::{DecodeError, ProtocolError};
use crate::message::{self, Message};

/// Parses one JSON text into a [`Message`].
///
/// Never panics, whatever the input.
pub fn decode(text: &str) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| DecodeError::NotParseable(e.to_string()))?;

    let Value::Object(ref fields) = value else {
        return Err(DecodeError::NotParseable(format!(
            "expected an object, got {}",
            kind_of(&value)
        )));
    };

    let message_type = match fields.get("type") {
        None => return Err(DecodeError::MissingType),
        Some(Value::String(s)) if s.is_empty() => return Err(DecodeError::MissingType),
        Some(Value::String(s)) => s.as_str(),
        // A non-string discriminator cannot name any registered shape.
        Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
    };

    let Some((message_type, decode_shape)) = message::lookup(message_type) else {
        return Err(DecodeError::UnknownType(message_type.to_owned()));
    };

    decode_shape(value).map_err(|e| DecodeError::InvalidFields {
        message_type,
        reason: e.to_string(),
    })
}

/// Like [`decode`], for a raw frame. Invalid UTF-8 is [`DecodeError::NotParseable`].
pub fn decode_bytes(bytes: &[u8]) -> Result<Message, DecodeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DecodeError::NotParseable(e.to_string()))?;
    decode(text)
}

/// Serializes a message to its JSON text, `"type"` included.
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

/// Serializes anything convertible into a [`Message`], as frame bytes.
pub fn encode_to_vec(message: impl Into<Message>) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(&message.into()).map_err(ProtocolError::Encode)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
