//! Length-prefixed message framing.
//!
//! Every message on the wire is a 4-byte big-endian length followed by
//! exactly that many payload bytes:
//!
//! ```text
//! ┌──────────────┬──────────────────────────┐
//! │ len: u32 BE  │ payload (len bytes)      │
//! └──────────────┴──────────────────────────┘
//! ```
//!
//! The reader learns the length before it allocates the body, and refuses
//! lengths above [`MAX_FRAME_LEN`]. A stream that ends before a whole frame
//! has arrived yields `Ok(None)` so a partial frame never reaches the codec.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest payload accepted in either direction (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Writes one frame: the length prefix, then the payload, then flushes.
///
/// # Errors
/// [`TransportError::FrameTooLarge`] if `payload` exceeds [`MAX_FRAME_LEN`];
/// [`TransportError::ConnectionLost`] if the peer went away.
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    // One buffer so the prefix and body leave in the same write.
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` at end of stream, including a stream that closes
/// partway through the prefix or the body.
///
/// # Errors
/// [`TransportError::FrameTooLarge`] if the prefix announces more than
/// [`MAX_FRAME_LEN`] bytes; [`TransportError::ConnectionLost`] on reset.
pub async fn read_frame<R>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    if !read_full(reader, &mut prefix).await? {
        return Ok(None);
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut body = vec![0u8; len];
    if !read_full(reader, &mut body).await? {
        return Ok(None);
    }
    Ok(Some(body))
}

/// Fills `buf` completely. `Ok(false)` means the stream ended first.
async fn read_full<R>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<bool, TransportError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip(payload: Vec<u8>) -> Vec<u8> {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let expected_len = payload.len();
        let writer = tokio::spawn(async move {
            write_frame(&mut client, &payload).await.unwrap();
            client
        });
        let frame = read_frame(&mut server).await.unwrap().unwrap();
        let _client = writer.await.unwrap();
        assert_eq!(frame.len(), expected_len);
        frame
    }

    #[tokio::test]
    async fn test_round_trip_simple_message() {
        let frame = round_trip(b"hello, arena".to_vec()).await;
        assert_eq!(frame, b"hello, arena");
    }

    #[tokio::test]
    async fn test_round_trip_empty_message() {
        let frame = round_trip(Vec::new()).await;
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_ten_mebibytes() {
        let payload: Vec<u8> =
            (0..10 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let frame = round_trip(payload.clone()).await;
        assert_eq!(frame, payload);
    }

    #[tokio::test]
    async fn test_prefix_is_big_endian() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abc").await.unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 3]);
        assert_eq!(&buf[4..], b"abc");
    }

    #[tokio::test]
    async fn test_multiple_frames_keep_boundaries() {
        let mut buf = Vec::new();
        for msg in [&b"first"[..], b"second", b"third"] {
            write_frame(&mut buf, msg).await.unwrap();
        }
        let mut reader = &buf[..];
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"second");
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"third");
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_stream_is_end_of_stream() {
        let mut reader: &[u8] = &[];
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_prefix_is_end_of_stream() {
        let mut reader: &[u8] = &[0, 1];
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_body_is_end_of_stream() {
        // Announces 10 bytes, delivers 3.
        let mut reader: &[u8] = &[0, 0, 0, 10, b'a', b'b', b'c'];
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_prefix_is_rejected_before_allocating() {
        let prefix = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        let mut reader: &[u8] = &prefix;
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_oversized_write_is_rejected() {
        let big = vec![0u8; MAX_FRAME_LEN + 1];
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, &big).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
        assert!(buf.is_empty(), "nothing should be written");
    }
}
