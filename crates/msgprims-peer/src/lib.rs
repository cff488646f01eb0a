//! Message protocol engine over byte-stream connections.
//!
//! This is the "just works" layer. Spawn a connection task over any
//! transport, then:
//! - send fire-and-forget JSON messages
//! - send a message and await the peer's one-shot callback reply
//! - open a streaming request and read reply packets until the replier ends
//!   the stream or its timeout elapses
//!
//! Liveness is checked with ping/pong when a ping interval is configured.

pub mod callback;
pub mod config;
pub mod connector;
pub mod envelope;
pub mod error;
pub mod liveness;
pub mod peer;
pub mod registry;
pub mod server;
pub mod stream;

pub use callback::{CallbackCorrelator, ReplyFuture, Resolver};
pub use config::{PeerConfig, ResponseTimeout, DEFAULT_RESPONSE_TIMEOUT};
pub use connector::connect;
pub use envelope::{
    DataEnvelope, Envelope, Ping, Pong, Request, ResponseBody, ResponsePacket, RESERVED_TYPES,
};
pub use error::{PeerError, Result, StreamError};
pub use liveness::{LivenessMonitor, PingRecord, Tick, PING_HISTORY};
pub use peer::{
    CallbackReply, DisconnectReason, EventStream, Peer, PeerEvent, PeerHandle, PeerStats,
};
pub use registry::{RegistryError, Terminal, TimedRegistry};
pub use server::{ConnectionId, Server, ServerEvent};
pub use stream::{ResponseStream, ResponseWriter, StreamItem};
