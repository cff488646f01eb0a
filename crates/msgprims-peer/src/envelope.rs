//! Wire envelopes.
//!
//! Every frame carries one JSON record:
//!
//! ```json
//! {"type": "Object", "data": {...}, "id": 7}
//! ```
//!
//! `type` is either one of the reserved protocol tags ([`TYPE_PING`],
//! [`TYPE_PONG`], [`TYPE_REQUEST`], [`TYPE_RESPONSE_PACKET`]) or an
//! application tag describing the shape of `data`. Frames that do not match
//! any known envelope shape are delivered as raw data.

use bytes::Bytes;
use msgprims_frame::encode_json;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::{PeerError, Result};

/// Heartbeat request.
pub const TYPE_PING: &str = "Ping";
/// Heartbeat reply.
pub const TYPE_PONG: &str = "Pong";
/// Opens a streaming exchange.
pub const TYPE_REQUEST: &str = "Request";
/// One reply packet of a streaming exchange.
pub const TYPE_RESPONSE_PACKET: &str = "Response-packet";

/// Type tags application payloads may not use.
pub const RESERVED_TYPES: [&str; 4] = [TYPE_PING, TYPE_PONG, TYPE_REQUEST, TYPE_RESPONSE_PACKET];

/// True for tags the protocol itself uses.
pub fn is_reserved(type_name: &str) -> bool {
    RESERVED_TYPES.contains(&type_name)
}

/// Type tag stamped on application data that carries no explicit one.
pub fn shape_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Liveness probe; the receiver answers with a [`Pong`] carrying the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Per-connection ping counter.
    pub id: u64,
    /// Sender clock, milliseconds since the Unix epoch.
    pub created: u64,
}

/// Answer to a [`Ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Id of the ping being answered.
    pub id: u64,
    /// Responder clock, milliseconds since the Unix epoch.
    pub returned: u64,
}

/// Opening packet of a streaming exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub stream_id: u64,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePacket {
    pub stream_id: u64,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Data(Value),
    /// Terminal marker: no more packets follow.
    End,
    /// Terminal failure reported by the replier.
    Error(String),
}

/// Application data, optionally correlated with a callback.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEnvelope {
    /// `None` for raw frames from peers that do not speak envelopes.
    pub type_name: Option<String>,
    pub data: Value,
    /// Set when the sender wants a reply tagged with this id.
    pub id: Option<u64>,
    /// Set when this envelope is the reply to an earlier `id`.
    pub callback_id: Option<u64>,
}

impl DataEnvelope {
    /// Plain data; its type tag is derived from the JSON shape.
    pub fn new(data: Value) -> Self {
        Self {
            type_name: Some(shape_tag(&data).to_string()),
            data,
            id: None,
            callback_id: None,
        }
    }

    /// Data with an explicit application type tag.
    pub fn typed(type_name: impl Into<String>, data: Value) -> Result<Self> {
        let type_name = type_name.into();
        if is_reserved(&type_name) {
            return Err(PeerError::ReservedType(type_name));
        }
        Ok(Self {
            type_name: Some(type_name),
            data,
            id: None,
            callback_id: None,
        })
    }

    fn raw(data: Value) -> Self {
        Self {
            type_name: None,
            data,
            id: None,
            callback_id: None,
        }
    }
}

/// Every kind of envelope that can appear on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Ping(Ping),
    Pong(Pong),
    Request(Request),
    Response(ResponsePacket),
    Data(DataEnvelope),
}

impl Envelope {
    /// Classify a decoded frame. Never fails: anything unrecognized is raw
    /// data.
    pub fn parse(value: Value) -> Envelope {
        let wire = match WireEnvelope::deserialize(&value) {
            Ok(wire) => wire,
            Err(_) => return Envelope::Data(DataEnvelope::raw(value)),
        };
        match wire.into_envelope() {
            Some(envelope) => envelope,
            None => {
                tracing::debug!("malformed protocol envelope; delivering as raw data");
                Envelope::Data(DataEnvelope::raw(value))
            }
        }
    }

    /// Serialize into a frame payload (compact JSON, no terminator).
    pub fn encode(self) -> Result<Bytes> {
        Ok(encode_json(&WireEnvelope::from(self))?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    callback_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stream_id: Option<u64>,
    #[serde(default, skip_serializing_if = "is_false")]
    end: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl WireEnvelope {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            data: None,
            id: None,
            callback_id: None,
            stream_id: None,
            end: false,
            error: None,
        }
    }

    fn into_envelope(self) -> Option<Envelope> {
        match self.kind.as_str() {
            TYPE_PING => Ping::deserialize(self.data?).ok().map(Envelope::Ping),
            TYPE_PONG => Pong::deserialize(self.data?).ok().map(Envelope::Pong),
            TYPE_REQUEST => Some(Envelope::Request(Request {
                stream_id: self.stream_id?,
                payload: self.data?,
            })),
            TYPE_RESPONSE_PACKET => {
                let body = match (self.error, self.end, self.data) {
                    (Some(message), _, _) => ResponseBody::Error(message),
                    (None, true, _) => ResponseBody::End,
                    (None, false, Some(data)) => ResponseBody::Data(data),
                    (None, false, None) => return None,
                };
                Some(Envelope::Response(ResponsePacket {
                    stream_id: self.stream_id?,
                    body,
                }))
            }
            _ => {
                if self.stream_id.is_some() || self.end || self.error.is_some() {
                    return None;
                }
                Some(Envelope::Data(DataEnvelope {
                    type_name: Some(self.kind),
                    data: self.data?,
                    id: self.id,
                    callback_id: self.callback_id,
                }))
            }
        }
    }
}

impl From<Envelope> for WireEnvelope {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Ping(ping) => WireEnvelope {
                data: Some(json!({"id": ping.id, "created": ping.created})),
                ..WireEnvelope::new(TYPE_PING)
            },
            Envelope::Pong(pong) => WireEnvelope {
                data: Some(json!({"id": pong.id, "returned": pong.returned})),
                ..WireEnvelope::new(TYPE_PONG)
            },
            Envelope::Request(request) => WireEnvelope {
                data: Some(request.payload),
                stream_id: Some(request.stream_id),
                ..WireEnvelope::new(TYPE_REQUEST)
            },
            Envelope::Response(packet) => {
                let mut wire = WireEnvelope {
                    stream_id: Some(packet.stream_id),
                    ..WireEnvelope::new(TYPE_RESPONSE_PACKET)
                };
                match packet.body {
                    ResponseBody::Data(data) => wire.data = Some(data),
                    ResponseBody::End => wire.end = true,
                    ResponseBody::Error(message) => wire.error = Some(message),
                }
                wire
            }
            Envelope::Data(envelope) => {
                let kind = envelope
                    .type_name
                    .unwrap_or_else(|| shape_tag(&envelope.data).to_string());
                WireEnvelope {
                    kind,
                    data: Some(envelope.data),
                    id: envelope.id,
                    callback_id: envelope.callback_id,
                    stream_id: None,
                    end: false,
                    error: None,
                }
            }
        }
    }
}

// Distinguishes `"data": null` from a missing `data` key.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn is_false(b: &bool) -> bool {
    !*b
}
