//! Object-level messaging over byte streams.
//!
//! msgprims turns a TCP or Unix socket into a sequence of JSON messages and
//! layers three exchange styles on top: fire-and-forget messages, one-shot
//! callback replies, and streaming requests with timeout-bounded lifetimes.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and Unix domain socket streams and listeners
//! - [`frame`]: terminator-delimited framing and JSON payload rules
//! - [`peer`]: the protocol engine, connection tasks and server (behind the
//!   `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use msgprims_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use msgprims_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use msgprims_peer::*;
}
