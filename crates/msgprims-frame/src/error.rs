/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame payload is not valid UTF-8 text.
    #[error("corrupted frame: {len} bytes of non-UTF-8 data")]
    InvalidUtf8 { len: usize },

    /// A frame payload is not valid JSON and non-JSON payloads are disallowed.
    #[error("corrupted frame: {source} (payload starts with {preview:?})")]
    Corrupted {
        preview: String,
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be serialized to JSON. No bytes were produced.
    #[error("payload is not serializable: {0}")]
    Serialize(#[source] serde_json::Error),

    /// A raw text payload was submitted while non-JSON payloads are disallowed.
    #[error("non-JSON payloads are disabled (set allow_non_json to send raw text)")]
    NonJsonDisallowed,

    /// A terminator must contain at least one byte.
    #[error("frame terminator must not be empty")]
    EmptyTerminator,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
