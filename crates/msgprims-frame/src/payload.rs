//! Structured-text payload rules.
//!
//! Frames carry compact JSON. A frame that is not JSON is either a
//! corrupted frame or, with `allow_non_json`, a plain string value.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::error::{FrameError, Result};

const PREVIEW_CHARS: usize = 32;

/// Parse one frame payload into a JSON value.
pub fn decode_payload(frame: &[u8], allow_non_json: bool) -> Result<Value> {
    let text =
        std::str::from_utf8(frame).map_err(|_| FrameError::InvalidUtf8 { len: frame.len() })?;

    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(_) if allow_non_json => Ok(Value::String(text.to_string())),
        Err(source) => Err(FrameError::Corrupted {
            preview: text.chars().take(PREVIEW_CHARS).collect(),
            source,
        }),
    }
}

/// Serialize a value as a compact JSON frame payload.
///
/// Fails with [`FrameError::Serialize`] and produces nothing if the value
/// cannot be represented as JSON.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(FrameError::Serialize)
}

/// Use raw text as a frame payload, bypassing JSON encoding.
pub fn encode_text(text: &str, allow_non_json: bool) -> Result<Bytes> {
    if !allow_non_json {
        return Err(FrameError::NonJsonDisallowed);
    }
    Ok(Bytes::copy_from_slice(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::buffer::FrameBuffer;

    #[test]
    fn json_round_trip_through_framing() {
        let values = [
            json!({"a": 1, "nested": {"list": [1, "two", null, true]}}),
            json!("line one\nline two"),
            json!(3.5),
            json!([]),
        ];
        let mut buffer = FrameBuffer::default();
        let mut wire = Vec::new();
        for value in &values {
            wire.extend_from_slice(&buffer.wrap(&encode_json(value).unwrap()));
        }

        let decoded: Vec<Value> = wire
            .chunks(3)
            .flat_map(|chunk| buffer.push(chunk))
            .map(|frame| decode_payload(&frame, false).unwrap())
            .collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn non_json_is_corrupted_when_disallowed() {
        let err = decode_payload(b"hello there", false).unwrap_err();
        match err {
            FrameError::Corrupted { preview, .. } => assert_eq!(preview, "hello there"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_json_passes_through_when_allowed() {
        assert_eq!(
            decode_payload(b"hello there", true).unwrap(),
            Value::String("hello there".to_string())
        );
        assert_eq!(decode_payload(b"{\"a\":1}", true).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn invalid_utf8_is_always_corrupted() {
        let err = decode_payload(&[0xff, 0xfe, b'{'], true).unwrap_err();
        assert!(matches!(err, FrameError::InvalidUtf8 { len: 3 }));
    }

    #[test]
    fn corrupted_frame_does_not_stop_later_frames() {
        let mut buffer = FrameBuffer::default();
        let results: Vec<_> = buffer
            .push(b"{\"ok\":1}\n{broken\n{\"ok\":2}\n")
            .into_iter()
            .map(|frame| decode_payload(&frame, false))
            .collect();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &json!({"ok": 1}));
        assert!(matches!(results[1], Err(FrameError::Corrupted { .. })));
        assert_eq!(results[2].as_ref().unwrap(), &json!({"ok": 2}));
    }

    #[test]
    fn unserializable_value_fails_distinctly() {
        let mut map = BTreeMap::new();
        map.insert((1u8, 2u8), "tuple keys are not JSON object keys");
        let err = encode_json(&map).unwrap_err();
        assert!(matches!(err, FrameError::Serialize(_)));
    }

    #[test]
    fn raw_text_requires_opt_in() {
        assert!(matches!(
            encode_text("plain", false),
            Err(FrameError::NonJsonDisallowed)
        ));
        assert_eq!(encode_text("plain", true).unwrap().as_ref(), b"plain");
    }
}
