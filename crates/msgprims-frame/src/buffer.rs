use bytes::{Bytes, BytesMut};

use crate::codec::{decode_frame, encode_frame, Terminators};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Push-style frame splitter.
///
/// Feed it whatever the transport delivered; it hands back every frame
/// completed by those bytes, in order, and keeps the unterminated tail for
/// the next push. No maximum frame size is enforced: the buffer grows until
/// a terminator arrives.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    terminators: Terminators,
    pending: BytesMut,
    scanned: usize,
}

impl FrameBuffer {
    /// Create a buffer that splits on `terminators.rx()`.
    pub fn new(terminators: Terminators) -> Self {
        Self {
            terminators,
            pending: BytesMut::new(),
            scanned: 0,
        }
    }

    /// Append bytes and return the frames they complete (possibly none).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        if self.pending.capacity() == 0 {
            self.pending.reserve(INITIAL_BUFFER_CAPACITY.max(bytes.len()));
        }
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(frame) =
            decode_frame(&mut self.pending, self.terminators.rx(), &mut self.scanned)
        {
            frames.push(frame);
        }

        if self.pending.is_empty() {
            // Fully consumed; drop the allocation.
            self.pending = BytesMut::new();
            self.scanned = 0;
        }
        frames
    }

    /// Wrap a payload for sending: payload followed by the tx terminator.
    pub fn wrap(&self, payload: &[u8]) -> Bytes {
        let mut dst = BytesMut::with_capacity(payload.len() + self.terminators.tx().len());
        encode_frame(payload, self.terminators.tx(), &mut dst);
        dst.freeze()
    }

    /// Number of buffered bytes not yet terminated.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Terminators in use.
    pub fn terminators(&self) -> &Terminators {
        &self.terminators
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(Terminators::default())
    }
}
