//! Error types for the engines.

use std::io;
use std::time::Duration;

use arena_transport::TransportError;

/// Errors returned by [`ClientEngine`](crate::ClientEngine) and
/// [`ServerEngine`](crate::ServerEngine).
///
/// Connection loss is deliberately absent: a lost connection is a state
/// change (the client drops back to `Idle`, the server forgets the
/// connection), not an error any caller has to handle.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine has no running worker.
    #[error("engine is not started")]
    NotStarted,

    /// `start` was called on a running engine.
    #[error("engine is already started")]
    AlreadyStarted,

    /// The OS refused to create a worker thread.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] io::Error),

    /// The worker did not come up.
    #[error("worker failed to start: {0}")]
    Startup(String),

    /// The requested state change is not allowed from the current state.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    /// `connect` gave up waiting for the connection.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A mailbox write did not land within its patience.
    #[error("mailbox full")]
    MailboxFull,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
