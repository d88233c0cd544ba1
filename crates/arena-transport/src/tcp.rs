//! TCP transport implementation.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::framing::{read_frame, write_frame};
use crate::{Connection, ConnectionId, Transport, TransportError};

type IdFilter = Arc<dyn Fn(&ConnectionId) -> bool + Send + Sync>;

/// A TCP [`Transport`] that listens for incoming connections.
pub struct TcpTransport {
    listener: TcpListener,
    /// Reports ids that are already in use so `accept` can regenerate.
    taken: IdFilter,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(addr).await.map_err(TransportError::Bind)?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self {
            listener,
            taken: Arc::new(|_| false),
        })
    }

    /// Sets the predicate used to detect connection id collisions.
    pub fn with_id_filter(
        mut self,
        taken: impl Fn(&ConnectionId) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.taken = Arc::new(taken);
        self
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;

        let taken = Arc::clone(&self.taken);
        let id = ConnectionId::allocate(peer, |candidate| taken(candidate));
        tracing::debug!(%id, %peer, "accepted TCP connection");

        Ok(TcpConnection::new(id, peer, stream))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// A single framed TCP connection.
///
/// The read and write halves are locked independently, so one task can
/// block in `recv` while others `send`. Concurrent senders are serialized
/// by the write lock and never interleave frames.
pub struct TcpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpConnection {
    fn new(id: ConnectionId, peer: SocketAddr, stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%id, error = %e, "could not disable Nagle");
        }
        let (reader, writer) = stream.into_split();
        Self {
            id,
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    /// Opens a connection to `addr`.
    ///
    /// The id is derived from the local address, which is what the server
    /// side derives its id for this connection from.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(TransportError::Connect)?;
        let peer = stream.peer_addr().map_err(TransportError::Connect)?;
        let local = stream.local_addr().map_err(TransportError::Connect)?;
        let id = ConnectionId::derive(local, 0);
        tracing::debug!(%id, %peer, "connected");
        Ok(Self::new(id, peer, stream))
    }

    /// Returns the remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, data).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut reader = self.reader.lock().await;
        read_frame(&mut *reader).await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        match self.writer.lock().await.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) => match TransportError::from(e) {
                // Already gone is as closed as it gets.
                TransportError::ConnectionLost(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
