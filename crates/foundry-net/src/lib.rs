//! Transport boundary for Foundry replication: identifiers, the outbound
//! [`Transport`] trait, the inbound queue that hands messages to the tick
//! thread, in-process and stream transports, and session lifecycle.

pub mod framing;
pub mod ids;
pub mod inbound;
pub mod loopback;
pub mod session;
pub mod stream;
pub mod transport;

pub use bytes::Bytes;
pub use framing::{FrameConfig, FrameError, encode_frame, read_frame, write_frame};
pub use ids::{NetworkId, PlayerId};
pub use inbound::{InboundMessage, InboundReceiver, InboundSender, inbound_channel};
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use session::{Session, SessionError, SessionState};
pub use stream::{Envelope, StreamTransport, spawn_reader};
pub use transport::{Destination, RecordingTransport, Transport, TransportError};
