//! Unified error type for the arena.

use std::time::Duration;

use arena_engine::EngineError;
use arena_protocol::{DecodeError, ProtocolError};
use arena_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` variants let `?` lift an error from any layer. The rest
/// describe what went wrong in a request/response exchange.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// No reply arrived in time.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-zero status.
    #[error("rejected by server (status {status}): {message}")]
    Rejected { status: i32, message: String },

    /// The server answered with the wrong message type.
    #[error("expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    /// The client is not connected.
    #[error("not connected to the server")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_engine_error() {
        let err: ArenaError = EngineError::NotStarted.into();
        assert!(matches!(err, ArenaError::Engine(EngineError::NotStarted)));
        assert_eq!(err.to_string(), "engine is not started");
    }

    #[test]
    fn test_from_decode_error() {
        let err: ArenaError = DecodeError::MissingType.into();
        assert!(matches!(err, ArenaError::Decode(_)));
    }

    #[test]
    fn test_rejected_display() {
        let err = ArenaError::Rejected {
            status: 1,
            message: "Invalid message".into(),
        };
        assert_eq!(
            err.to_string(),
            "rejected by server (status 1): Invalid message"
        );
    }
}
