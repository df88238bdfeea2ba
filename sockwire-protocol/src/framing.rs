//! Length-delimited framing over a byte stream.
//!
//! The transport contract is one message per frame. Over a raw stream this
//! is realized with a 4-byte big-endian length prefix; the codec itself
//! never sees the prefix and always operates on exactly one frame's bytes.

use crate::error::ProtocolError;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the frame length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Outcome of reading one frame.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete frame was read into the buffer.
    Frame,
    /// The peer closed the stream cleanly between frames.
    Closed,
}

/// Reads one frame into `buf`, replacing its contents.
///
/// EOF before the first prefix byte is a clean close; EOF anywhere else is
/// an abnormal close surfaced as an `UnexpectedEof` I/O error.
pub async fn read_frame<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_size: u32,
) -> Result<ReadOutcome, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(ReadOutcome::Closed);
            }
            return Err(abnormal_close());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix);
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }
    if len > max_size {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    buf.clear();
    buf.resize(len as usize, 0);
    reader
        .read_exact(&mut buf[..])
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => abnormal_close(),
            _ => ProtocolError::Io(e),
        })?;
    Ok(ReadOutcome::Frame)
}

/// Writes one frame (prefix plus bytes) and flushes.
pub async fn write_frame<W>(
    writer: &mut W,
    frame: &[u8],
    max_size: u32,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if frame.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    if frame.len() > max_size as usize {
        return Err(ProtocolError::FrameTooLarge {
            size: frame.len() as u32,
            max: max_size,
        });
    }
    let prefix = (frame.len() as u32).to_be_bytes();
    writer.write_all(&prefix).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Returns whether the error is an abnormal close of the stream.
pub fn is_abnormal_close(error: &ProtocolError) -> bool {
    matches!(
        error,
        ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof
    )
}

fn abnormal_close() -> ProtocolError {
    ProtocolError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "stream closed mid-frame",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u32 = 1024;

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(256);

        write_frame(&mut a, b"hello frame", MAX).await.unwrap();

        let mut buf = BytesMut::new();
        let outcome = read_frame(&mut b, &mut buf, MAX).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Frame);
        assert_eq!(&buf[..], b"hello frame");
    }

    #[tokio::test]
    async fn test_sequential_frames_keep_boundaries() {
        let (mut a, mut b) = tokio::io::duplex(256);

        write_frame(&mut a, b"first", MAX).await.unwrap();
        write_frame(&mut a, b"second frame", MAX).await.unwrap();

        let mut buf = BytesMut::new();
        read_frame(&mut b, &mut buf, MAX).await.unwrap();
        assert_eq!(&buf[..], b"first");
        read_frame(&mut b, &mut buf, MAX).await.unwrap();
        assert_eq!(&buf[..], b"second frame");
    }

    #[tokio::test]
    async fn test_clean_close_between_frames() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_frame(&mut a, b"only", MAX).await.unwrap();
        drop(a);

        let mut buf = BytesMut::new();
        read_frame(&mut b, &mut buf, MAX).await.unwrap();
        let outcome = read_frame(&mut b, &mut buf, MAX).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Closed);
    }

    #[tokio::test]
    async fn test_abnormal_close_mid_frame() {
        let (mut a, mut b) = tokio::io::duplex(256);
        // Announce 100 bytes but deliver only 3.
        a.write_all(&100u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        let mut buf = BytesMut::new();
        let err = read_frame(&mut b, &mut buf, MAX).await.unwrap_err();
        assert!(is_abnormal_close(&err));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut a, mut b) = tokio::io::duplex(256);
        a.write_all(&(MAX + 1).to_be_bytes()).await.unwrap();

        let mut buf = BytesMut::new();
        let err = read_frame(&mut b, &mut buf, MAX).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let (mut a, _b) = tokio::io::duplex(256);
        let frame = vec![0u8; (MAX + 1) as usize];
        let err = write_frame(&mut a, &frame, MAX).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_zero_length_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(256);
        a.write_all(&0u32.to_be_bytes()).await.unwrap();

        let mut buf = BytesMut::new();
        let err = read_frame(&mut b, &mut buf, MAX).await.unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyFrame));
    }
}
