//! Transport over a single ordered byte stream, e.g. a TCP link to a relay.
//!
//! Every payload travels as an [`Envelope`] inside one length-prefixed frame.
//! [`StreamTransport`] encodes envelopes on the tick thread and hands the
//! frames to a writer task; [`spawn_reader`] decodes incoming frames into the
//! inbound queue.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::framing::{FrameConfig, FrameError, encode_frame, read_frame};
use crate::ids::{NetworkId, PlayerId};
use crate::inbound::{InboundMessage, InboundSender};
use crate::transport::{Destination, Transport, TransportError};

/// Routing header plus payload, as written to the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Original sender.
    pub from: PlayerId,
    /// Intended recipient(s); a relay fans out broadcasts.
    pub to: Destination,
    /// Target entity.
    pub entity: NetworkId,
    /// Encoded entity records.
    pub payload: Vec<u8>,
}

/// Sending half of a stream link.
#[derive(Debug, Clone)]
pub struct StreamTransport {
    local: PlayerId,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    config: FrameConfig,
}

impl StreamTransport {
    /// Create a transport and the writer task draining it into `writer`.
    pub fn spawn<W>(local: PlayerId, writer: W, config: FrameConfig) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (frames, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_loop(writer, rx));
        (
            Self {
                local,
                frames,
                config,
            },
            handle,
        )
    }
}

impl Transport for StreamTransport {
    fn send(
        &mut self,
        destination: Destination,
        entity: NetworkId,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let envelope = Envelope {
            from: self.local,
            to: destination,
            entity,
            payload: payload.to_vec(),
        };
        let body =
            postcard::to_allocvec(&envelope).map_err(|e| TransportError::Encode(e.to_string()))?;
        let frame =
            encode_frame(&body, &self.config).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.frames.send(frame).map_err(|_| TransportError::Closed)
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::warn!("Stream write failed, closing link: {e}");
            return;
        }
        if let Err(e) = writer.flush().await {
            tracing::warn!("Stream flush failed, closing link: {e}");
            return;
        }
    }
}

/// Spawn a task that reads envelopes from `reader` and pushes them to `inbound`.
///
/// Malformed envelopes are logged and skipped. The task ends when the stream
/// closes, a frame is torn, or the inbound queue is dropped.
pub fn spawn_reader<R>(reader: R, inbound: InboundSender, config: FrameConfig) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(read_loop(reader, inbound, config))
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, inbound: InboundSender, config: FrameConfig) {
    loop {
        let frame = match read_frame(&mut reader, &config).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("Stream closed by peer");
                return;
            }
            Err(FrameError::PayloadTooLarge { size, max }) => {
                tracing::warn!("Dropping link: frame of {size} bytes exceeds {max}");
                return;
            }
            Err(e) => {
                tracing::warn!("Stream read failed: {e}");
                return;
            }
        };
        if frame.is_empty() {
            continue;
        }

        let envelope: Envelope = match postcard::from_bytes(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Skipping malformed envelope: {e}");
                continue;
            }
        };
        let message = InboundMessage {
            from: envelope.from,
            entity: envelope.entity,
            payload: Bytes::from(envelope.payload),
        };
        if inbound.push(message).await.is_err() {
            tracing::debug!("Inbound queue dropped, stopping reader");
            return;
        }
    }
}
