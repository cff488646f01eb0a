//! Async byte-stream transports.
//!
//! Provides a unified interface over the stream transports msgprims runs on:
//! - TCP sockets
//! - Unix domain sockets (Linux/macOS)
//!
//! This is the lowest layer of msgprims. Everything else builds on top of
//! the [`IpcStream`] type provided here. The transport knows nothing about
//! framing or messages; it only moves bytes.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::{connect, IpcListener};
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
