use std::io;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer went away: reset, aborted, broken pipe, or a stream that
    /// ended in the middle of a frame.
    ///
    /// Callers treat this uniformly as "peer disconnected".
    #[error("connection lost: {0}")]
    ConnectionLost(io::ErrorKind),

    /// A frame announced (or was asked to carry) more bytes than allowed.
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// The offending length.
        len: usize,
        /// The configured maximum.
        max: usize,
    },

    /// Binding the listening socket failed.
    #[error("bind failed: {0}")]
    Bind(#[source] io::Error),

    /// Accepting an incoming connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Opening an outgoing connection failed.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// Any other I/O failure on an established connection.
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
}

impl TransportError {
    /// Returns `true` if the error means the peer is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

impl From<io::Error> for TransportError {
    /// Classifies an I/O error from an established connection.
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => Self::ConnectionLost(e.kind()),
            _ => Self::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_aborted_and_broken_pipe_are_connection_lost() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
        ] {
            let err = TransportError::from(io::Error::from(kind));
            assert!(err.is_connection_lost(), "{kind:?} should be connection lost");
        }
    }

    #[test]
    fn test_other_io_errors_stay_generic() {
        let err = TransportError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, TransportError::Io(_)));
        assert!(!err.is_connection_lost());
    }
}
