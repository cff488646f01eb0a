use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;

use crate::error::{FrameError, Result};

/// Default frame terminator: a single newline.
pub const DEFAULT_TERMINATOR: &str = "\n";

/// Inbound and outbound frame terminators.
///
/// `rx` splits bytes read from the peer, `tx` is appended to every frame we
/// write. They are the same unless the peer is asymmetric.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "TerminatorSetting")]
pub struct Terminators {
    rx: Bytes,
    tx: Bytes,
}

impl Terminators {
    /// Use the same terminator in both directions.
    pub fn symmetric(terminator: impl AsRef<[u8]>) -> Result<Self> {
        Self::split(terminator.as_ref(), terminator.as_ref())
    }

    /// Use distinct inbound (`rx`) and outbound (`tx`) terminators.
    pub fn split(rx: impl AsRef<[u8]>, tx: impl AsRef<[u8]>) -> Result<Self> {
        let (rx, tx) = (rx.as_ref(), tx.as_ref());
        if rx.is_empty() || tx.is_empty() {
            return Err(FrameError::EmptyTerminator);
        }
        Ok(Self {
            rx: Bytes::copy_from_slice(rx),
            tx: Bytes::copy_from_slice(tx),
        })
    }

    /// Terminator that ends inbound frames.
    pub fn rx(&self) -> &[u8] {
        &self.rx
    }

    /// Terminator appended to outbound frames.
    pub fn tx(&self) -> &[u8] {
        &self.tx
    }
}

impl Default for Terminators {
    fn default() -> Self {
        Self {
            rx: Bytes::from_static(DEFAULT_TERMINATOR.as_bytes()),
            tx: Bytes::from_static(DEFAULT_TERMINATOR.as_bytes()),
        }
    }
}

/// Config-file form of a terminator: `"\n"` or `["\r\n", "\n"]` (rx, tx).
#[derive(Deserialize)]
#[serde(untagged)]
enum TerminatorSetting {
    Both(String),
    Pair([String; 2]),
}

impl TryFrom<TerminatorSetting> for Terminators {
    type Error = FrameError;

    fn try_from(setting: TerminatorSetting) -> Result<Self> {
        match setting {
            TerminatorSetting::Both(t) => Terminators::symmetric(t),
            TerminatorSetting::Pair([rx, tx]) => Terminators::split(rx, tx),
        }
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameConfig {
    /// Frame terminators. Default: `"\n"` both ways.
    pub terminators: Terminators,
    /// Pass non-JSON frames through as plain text instead of reporting them
    /// as corrupted, and allow raw text to be written. Default: false.
    pub allow_non_json: bool,
}

/// Append one frame (payload followed by `terminator`) to `dst`.
///
/// The payload must not contain the terminator; if it does the peer will
/// split it into two frames.
pub fn encode_frame(payload: &[u8], terminator: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + terminator.len());
    dst.put_slice(payload);
    dst.put_slice(terminator);
}

/// Extract the next terminator-delimited frame from `src`.
///
/// `scanned` remembers how far the previous call searched so bytes are not
/// rescanned on every read. Returns `None` when no complete frame is
/// buffered yet. On success the frame and its terminator are consumed.
pub fn decode_frame(src: &mut BytesMut, terminator: &[u8], scanned: &mut usize) -> Option<Bytes> {
    let start = (*scanned).min(src.len());
    let found = src[start..]
        .windows(terminator.len())
        .position(|window| window == terminator);

    match found {
        Some(pos) => {
            let frame = src.split_to(start + pos).freeze();
            src.advance(terminator.len());
            *scanned = 0;
            Some(frame)
        }
        None => {
            // A multi-byte terminator may straddle the next read.
            *scanned = src.len().saturating_sub(terminator.len() - 1);
            None
        }
    }
}

/// `tokio_util` codec for terminator-delimited frames.
///
/// Decodes into raw frame payloads; JSON handling lives in
/// [`crate::payload`] so that one corrupted frame never poisons the stream.
#[cfg(feature = "async")]
#[derive(Debug, Clone, Default)]
pub struct DelimitedCodec {
    terminators: Terminators,
    scanned: usize,
}

#[cfg(feature = "async")]
impl DelimitedCodec {
    /// Create a codec using the given terminators.
    pub fn new(terminators: Terminators) -> Self {
        Self {
            terminators,
            scanned: 0,
        }
    }

    /// Terminators in use.
    pub fn terminators(&self) -> &Terminators {
        &self.terminators
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Decoder for DelimitedCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        Ok(decode_frame(src, &self.terminators.rx, &mut self.scanned))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            tracing::debug!(len = src.len(), "discarding unterminated bytes at end of stream");
            src.clear();
        }
        self.scanned = 0;
        Ok(None)
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<Bytes> for DelimitedCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&payload, &self.terminators.tx, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buf: &mut BytesMut, terminator: &[u8]) -> Vec<Bytes> {
        let mut scanned = 0;
        let mut out = Vec::new();
        while let Some(frame) = decode_frame(buf, terminator, &mut scanned) {
            out.push(frame);
        }
        out
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        encode_frame(br#"{"hello":"msgprims"}"#, b"\n", &mut buf);
        assert_eq!(buf.as_ref(), b"{\"hello\":\"msgprims\"}\n");

        let frames = drain(&mut buf, b"\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), br#"{"hello":"msgprims"}"#);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_frame() {
        let mut buf = BytesMut::from(&b"{\"partial\""[..]);
        let mut scanned = 0;
        assert!(decode_frame(&mut buf, b"\n", &mut scanned).is_none());
        assert_eq!(scanned, buf.len());
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_multiple_frames_keep_tail() {
        let mut buf = BytesMut::from(&b"one\ntwo\nthr"[..]);
        let frames = drain(&mut buf, b"\n");
        assert_eq!(frames, vec![Bytes::from("one"), Bytes::from("two")]);
        assert_eq!(buf.as_ref(), b"thr");
    }

    #[test]
    fn test_empty_frame_between_terminators() {
        let mut buf = BytesMut::from(&b"a\n\nb\n"[..]);
        let frames = drain(&mut buf, b"\n");
        assert_eq!(
            frames,
            vec![Bytes::from("a"), Bytes::new(), Bytes::from("b")]
        );
    }

    #[test]
    fn test_multibyte_terminator_split_across_reads() {
        let mut buf = BytesMut::new();
        let mut scanned = 0;

        buf.extend_from_slice(b"payload<E");
        assert!(decode_frame(&mut buf, b"<EOM>", &mut scanned).is_none());
        buf.extend_from_slice(b"OM>next<EOM>");

        let first = decode_frame(&mut buf, b"<EOM>", &mut scanned).unwrap();
        let second = decode_frame(&mut buf, b"<EOM>", &mut scanned).unwrap();
        assert_eq!(first.as_ref(), b"payload");
        assert_eq!(second.as_ref(), b"next");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_terminators_reject_empty() {
        assert!(matches!(
            Terminators::symmetric(""),
            Err(FrameError::EmptyTerminator)
        ));
        assert!(matches!(
            Terminators::split("\n", ""),
            Err(FrameError::EmptyTerminator)
        ));
    }

    #[test]
    fn test_terminators_deserialize_single_and_pair() {
        let one: Terminators = serde_json::from_str(r#""\r\n""#).unwrap();
        assert_eq!(one.rx(), b"\r\n");
        assert_eq!(one.tx(), b"\r\n");

        let pair: Terminators = serde_json::from_str(r#"["\u0000", "\n"]"#).unwrap();
        assert_eq!(pair.rx(), b"\0");
        assert_eq!(pair.tx(), b"\n");

        assert!(serde_json::from_str::<Terminators>(r#""""#).is_err());
    }

    #[cfg(feature = "async")]
    #[test]
    fn test_codec_uses_rx_for_decode_and_tx_for_encode() {
        use tokio_util::codec::{Decoder, Encoder};

        let mut codec = DelimitedCodec::new(Terminators::split("\r\n", "|").unwrap());

        let mut inbound = BytesMut::from(&b"a|b\r\nc"[..]);
        let frame = codec.decode(&mut inbound).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"a|b");
        assert!(codec.decode(&mut inbound).unwrap().is_none());

        let mut outbound = BytesMut::new();
        codec.encode(Bytes::from("x"), &mut outbound).unwrap();
        assert_eq!(outbound.as_ref(), b"x|");
    }

    #[cfg(feature = "async")]
    #[test]
    fn test_codec_discards_unterminated_tail_at_eof() {
        use tokio_util::codec::Decoder;

        let mut codec = DelimitedCodec::default();
        let mut inbound = BytesMut::from(&b"done\nhalf"[..]);
        assert_eq!(
            codec.decode_eof(&mut inbound).unwrap().unwrap().as_ref(),
            b"done"
        );
        assert!(codec.decode_eof(&mut inbound).unwrap().is_none());
        assert!(inbound.is_empty());
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_framed_read_over_fragmented_stream() {
        use futures_util::StreamExt;
        use tokio::io::AsyncWriteExt;
        use tokio_util::codec::FramedRead;

        let (mut tx, rx) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            for chunk in [&b"{\"a\""[..], b":1}\n{\"b", b"\":2}\n"] {
                tx.write_all(chunk).await.unwrap();
            }
        });

        let frames: Vec<Bytes> = FramedRead::new(rx, DelimitedCodec::default())
            .map(|frame| frame.unwrap())
            .collect()
            .await;
        writer.await.unwrap();

        assert_eq!(
            frames,
            vec![Bytes::from(r#"{"a":1}"#), Bytes::from(r#"{"b":2}"#)]
        );
    }
}
