//! Terminator-delimited message framing for byte streams.
//!
//! Every message on the wire is a UTF-8 text payload (normally compact JSON)
//! followed by a configurable terminator sequence:
//! - the default terminator is a single `\n`
//! - any non-empty string works, including multi-byte sequences
//! - inbound and outbound terminators may differ for asymmetric peers
//!
//! Glued and fragmented reads are handled here; callers always get whole
//! frames.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod payload;

pub use buffer::FrameBuffer;
#[cfg(feature = "async")]
pub use codec::DelimitedCodec;
pub use codec::{decode_frame, encode_frame, FrameConfig, Terminators, DEFAULT_TERMINATOR};
pub use error::{FrameError, Result};
pub use payload::{decode_payload, encode_json, encode_text};
