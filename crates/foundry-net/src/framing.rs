//! Length-prefixed framing for byte-stream transports.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length does not include the prefix itself. A zero-length frame is a
//! valid keepalive.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Limits applied by [`read_frame`] and [`write_frame`].
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 1 MiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Why a frame could not be read or written.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Frame larger than `max_payload_size`.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        /// Announced or actual payload length.
        size: usize,
        /// Limit in force.
        max: u32,
    },

    /// The stream ended part-way through a frame.
    #[error("stream closed mid-frame")]
    Truncated,

    /// Underlying stream failure.
    #[error("stream I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one frame.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary, so
/// reader loops can tell an orderly close from a torn frame.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Option<Vec<u8>>, FrameError> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    let mut filled = 0;
    while filled < LENGTH_PREFIX {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(FrameError::Truncated)
            };
        }
        filled += n;
    }

    let len = u32::from_le_bytes(prefix);
    if len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: len as usize,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(e)
        }
    })?;
    Ok(Some(payload))
}

/// Prefix `payload` with its length, ready for a single write.
pub fn encode_frame(payload: &[u8], config: &FrameConfig) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= config.max_payload_size)
        .ok_or(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: config.max_payload_size,
        })?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let frame = encode_frame(payload, config)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frames_arrive_separately() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        write_frame(&mut client, b"aaa", &config).await.unwrap();
        write_frame(&mut client, b"", &config).await.unwrap();
        write_frame(&mut client, b"bbb", &config).await.unwrap();

        assert_eq!(read_frame(&mut server, &config).await.unwrap().unwrap(), b"aaa");
        assert!(read_frame(&mut server, &config).await.unwrap().unwrap().is_empty());
        assert_eq!(read_frame(&mut server, &config).await.unwrap().unwrap(), b"bbb");
    }

    #[tokio::test]
    async fn test_small_buffer_forces_partial_reads() {
        let (mut client, mut server) = duplex(3);
        let config = FrameConfig::default();
        let payload = b"longer than the pipe buffer".to_vec();

        let write_config = config.clone();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            write_frame(&mut client, &payload, &write_config).await.unwrap();
        });

        let received = read_frame(&mut server, &config).await.unwrap().unwrap();
        writer.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_clean_close_yields_none() {
        let (client, mut server) = duplex(64);
        drop(client);
        let result = read_frame(&mut server, &FrameConfig::default()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_torn_prefix_is_truncated() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[7, 0]).await.unwrap();
        drop(client);
        let result = read_frame(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(FrameError::Truncated)));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut client, mut server) = duplex(64);
        let config = FrameConfig {
            max_payload_size: 16,
        };
        client.write_all(&1024u32.to_le_bytes()).await.unwrap();

        let result = read_frame(&mut server, &config).await;
        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn test_oversized_frame_rejected_on_encode() {
        let config = FrameConfig {
            max_payload_size: 4,
        };
        assert!(matches!(
            encode_frame(&[0u8; 5], &config),
            Err(FrameError::PayloadTooLarge { size: 5, max: 4 })
        ));
    }

    #[test]
    fn test_prefix_is_little_endian() {
        let frame = encode_frame(b"hello", &FrameConfig::default()).unwrap();
        assert_eq!(&frame[..4], &5u32.to_le_bytes());
        assert_eq!(&frame[4..], b"hello");
    }
}
