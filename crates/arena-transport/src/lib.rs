//! Transport layer for the arena networking stack.
//!
//! Provides the [`Transport`] and [`Connection`] traits, length-prefixed
//! [`framing`] over any async byte stream, and the TCP implementations
//! ([`TcpTransport`], [`TcpConnection`]) the engines run on.
//!
//! The transport knows nothing about message shapes. It moves opaque
//! payloads and reports a vanished peer as
//! [`TransportError::ConnectionLost`] so callers can treat every kind of
//! disconnect the same way.

#![allow(async_fn_in_trait)]

mod error;
pub mod framing;
mod tcp;

pub use error::TransportError;
pub use tcp::{TcpConnection, TcpTransport};

use std::fmt;
use std::net::SocketAddr;

use sha2::{Digest, Sha256};

/// Short identifier for a connection, derived from the peer address.
///
/// The id is the first three bytes of `sha256("ip:port")`, displayed as six
/// hex characters. When an id is already taken the derivation is salted
/// with an attempt counter and retried (see [`ConnectionId::allocate`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId([u8; ConnectionId::LEN]);

impl ConnectionId {
    /// Number of raw bytes in an id.
    pub const LEN: usize = 3;

    /// Creates a `ConnectionId` from raw bytes.
    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Derives the id for `peer`. Attempt 0 is the plain address hash;
    /// later attempts salt the hash with `#attempt`.
    pub fn derive(peer: SocketAddr, attempt: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", peer.ip(), peer.port()).as_bytes());
        if attempt > 0 {
            hasher.update(format!("#{attempt}").as_bytes());
        }
        let digest = hasher.finalize();
        Self([digest[0], digest[1], digest[2]])
    }

    /// Derives the first id for `peer` that `is_taken` does not reject.
    pub fn allocate(
        peer: SocketAddr,
        mut is_taken: impl FnMut(&ConnectionId) -> bool,
    ) -> Self {
        let mut attempt = 0u32;
        loop {
            let id = Self::derive(peer, attempt);
            if !is_taken(&id) {
                if attempt > 0 {
                    tracing::debug!(%peer, %id, attempt, "connection id collision resolved");
                }
                return id;
            }
            attempt = attempt.wrapping_add(1);
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Returns the address the transport is listening on.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// A single connection that moves whole frames.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one payload to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next payload from the remote peer.
    ///
    /// Returns `Ok(None)` when the peer closed the stream.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the sending side of the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the identifier for this connection.
    fn id(&self) -> ConnectionId;
}
