//! Error types for the protocol layer.
//!
//! Decoding is the interesting direction: bytes come from the network and
//! can be anything. [`DecodeError`] sorts every failure into one of four
//! kinds so the lobby can answer with a precise error message instead of
//! dropping the request.

/// Why a text payload could not be turned into a [`Message`](crate::Message).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The text is not JSON, or not a JSON object.
    #[error("payload is not a JSON object: {0}")]
    NotParseable(String),

    /// The object has no `"type"` field.
    #[error("payload has no \"type\" field")]
    MissingType,

    /// The `"type"` field names no registered message.
    #[error("unknown message type {0:?}")]
    UnknownType(String),

    /// The type is known but the fields do not match its shape.
    #[error("invalid fields for {message_type}: {reason}")]
    InvalidFields {
        message_type: &'static str,
        reason: String,
    },
}

impl DecodeError {
    /// The discriminator involved, when the payload got far enough to have one.
    pub fn message_type(&self) -> Option<&str> {
        match self {
            Self::UnknownType(t) => Some(t),
            Self::InvalidFields { message_type, .. } => Some(message_type),
            Self::NotParseable(_) | Self::MissingType => None,
        }
    }
}

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_message_type() {
        assert_eq!(DecodeError::MissingType.message_type(), None);
        assert_eq!(
            DecodeError::UnknownType("warp".into()).message_type(),
            Some("warp")
        );
        let err = DecodeError::InvalidFields {
            message_type: "join_lobby",
            reason: "missing field `player_name`".into(),
        };
        assert_eq!(err.message_type(), Some("join_lobby"));
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::UnknownType("warp".into());
        assert_eq!(err.to_string(), "unknown message type \"warp\"");
    }

    #[test]
    fn test_protocol_error_wraps_decode_error() {
        let err: ProtocolError = DecodeError::MissingType.into();
        assert!(matches!(err, ProtocolError::Decode(DecodeError::MissingType)));
        assert!(err.to_string().starts_with("decode failed"));
    }
}
