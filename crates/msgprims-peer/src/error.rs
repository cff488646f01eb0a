use std::time::Duration;

/// Errors returned by peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] msgprims_transport::TransportError),

    /// Frame-level error (serialization, raw text policy).
    #[error("frame error: {0}")]
    Frame(#[from] msgprims_frame::FrameError),

    /// The connection is gone; nothing was (or will be) delivered.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// Application data tried to use a type tag reserved by the protocol.
    #[error("type tag '{0}' is reserved by the protocol")]
    ReservedType(String),

    /// The operation is not available for this peer.
    #[error("{0} not supported by a legacy peer")]
    Unsupported(&'static str),

    /// A response writer was used after its stream ended.
    #[error("response stream {0} already ended")]
    StreamEnded(u64),

    /// The server has no live connection with this id.
    #[error("unknown connection {0}")]
    UnknownConnection(u64),
}

pub type Result<T> = std::result::Result<T, PeerError>;

/// Why a response stream ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// No terminal packet arrived before the response timeout.
    #[error("response stream timed out after {0:?}")]
    TimedOut(Duration),

    /// The connection was torn down or the stream registry stopped.
    #[error("response stream stopped locally")]
    Stopped,

    /// The replier ended the stream with an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Another stream was registered under the same id.
    #[error("response stream replaced")]
    Replaced,
}
