//! Wire codec for the CozyLife local protocol.
//!
//! Devices speak newline-delimited JSON on both transports: each frame is a
//! single object terminated by `\r\n`. Every frame carries a command code
//! (`cmd`), a protocol version (`pv`), an opaque correlation token (`sn`)
//! chosen by the requester and echoed verbatim by the device, and a `msg`
//! payload. Replies additionally carry a `res` status code.
//!
//! Command 0 is shared between discovery (UDP) and the device-info exchange
//! (TCP); [`Channel`] names which kind a cmd-0 frame is on which transport.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::points::{DataPointMap, DpValue};

/// Command codes understood by device firmware.
const CMD_INFO: u8 = 0;
const CMD_QUERY: u8 = 2;
const CMD_SET: u8 = 3;

/// Protocol version sent in every frame.
const PROTOCOL_VERSION: u8 = 0;

/// Which transport a frame was sent or received on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// UDP discovery traffic (port 6095).
    Udp,
    /// TCP control sessions (port 5555).
    Tcp,
}

/// Device identity metadata carried by discover and device-info replies.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceMeta {
    /// Device serial identifier.
    pub did: String,
    /// Product id.
    pub pid: Option<String>,
    /// User-given device name.
    pub name: Option<String>,
    /// Device type code ("00" switch, "01" light, "02" socket).
    pub dtp: Option<String>,
    /// Data-point ids the device exposes.
    pub dpid: Option<Vec<u8>>,
}

/// A discrete protocol message exchanged over UDP or TCP.
///
/// Ephemeral: a message exists for the duration of one request/response
/// exchange. The correlation token `sn` is opaque to the codec; it is
/// preserved verbatim in both directions.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Broadcast probe asking devices to identify themselves.
    DiscoverProbe { sn: String },
    /// Unicast answer to a probe, carrying the device identity.
    DiscoverReply { sn: String, meta: DeviceMeta },
    /// In-session request for the device identity.
    DeviceInfoRequest { sn: String },
    /// Identity answer inside a control session.
    DeviceInfoReply { sn: String, meta: DeviceMeta },
    /// Request for current data-point values. An empty `attrs` list asks
    /// for every point.
    QueryRequest { sn: String, attrs: Vec<u8> },
    /// Data-point values answering a query.
    QueryReply { sn: String, points: DataPointMap },
    /// Request to change data-point values.
    ControlRequest { sn: String, points: DataPointMap },
    /// Acknowledgment that a control request was applied. May echo the
    /// applied values; devices that clamp report the result via query.
    ControlAck { sn: String, points: DataPointMap },
}

impl Message {
    /// The correlation token carried by this message.
    pub fn sn(&self) -> &str {
        match self {
            Message::DiscoverProbe { sn }
            | Message::DiscoverReply { sn, .. }
            | Message::DeviceInfoRequest { sn }
            | Message::DeviceInfoReply { sn, .. }
            | Message::QueryRequest { sn, .. }
            | Message::QueryReply { sn, .. }
            | Message::ControlRequest { sn, .. }
            | Message::ControlAck { sn, .. } => sn,
        }
    }

    /// Short name of the message kind, for logs and diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::DiscoverProbe { .. } => "discover_probe",
            Message::DiscoverReply { .. } => "discover_reply",
            Message::DeviceInfoRequest { .. } => "device_info_request",
            Message::DeviceInfoReply { .. } => "device_info_reply",
            Message::QueryRequest { .. } => "query_request",
            Message::QueryReply { .. } => "query_reply",
            Message::ControlRequest { .. } => "control_request",
            Message::ControlAck { .. } => "control_ack",
        }
    }
}

/// Errors produced while decoding a frame.
///
/// Each failure mode is distinct so callers can tell malformed input from
/// unknown-but-well-formed input.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    /// The frame is not valid JSON (truncated frames land here).
    #[error("frame is not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    /// The frame parsed but is not a JSON object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The command code is not one the protocol defines.
    #[error("unknown command code {0}")]
    UnknownCommand(u64),

    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A data-point key is not a small integer index.
    #[error("data point index {0:?} is not a small integer")]
    BadPointIndex(String),

    /// A data-point value is neither a boolean nor an integer.
    #[error("data point {0} has an unsupported value type")]
    BadPointValue(u8),
}

/// Generate a fresh opaque correlation token.
pub fn next_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Encode a message into one wire frame (JSON object plus `\r\n`).
///
/// Encoding is deterministic: the same message always produces the same
/// bytes.
pub fn encode(message: &Message) -> Vec<u8> {
    let frame = match message {
        Message::DiscoverProbe { sn } | Message::DeviceInfoRequest { sn } => json!({
            "cmd": CMD_INFO, "pv": PROTOCOL_VERSION, "sn": sn, "msg": {},
        }),
        Message::DiscoverReply { sn, meta } | Message::DeviceInfoReply { sn, meta } => json!({
            "cmd": CMD_INFO, "pv": PROTOCOL_VERSION, "res": 0, "sn": sn, "msg": meta,
        }),
        Message::QueryRequest { sn, attrs } => {
            // attr [0] is the firmware's "every point" wildcard.
            let attr: Vec<u64> = if attrs.is_empty() {
                vec![0]
            } else {
                attrs.iter().map(|id| *id as u64).collect()
            };
            json!({
                "cmd": CMD_QUERY, "pv": PROTOCOL_VERSION, "sn": sn, "msg": {"attr": attr},
            })
        }
        Message::QueryReply { sn, points } => json!({
            "cmd": CMD_QUERY, "pv": PROTOCOL_VERSION, "res": 0, "sn": sn,
            "msg": {"attr": points.indices(), "data": points},
        }),
        Message::ControlRequest { sn, points } => json!({
            "cmd": CMD_SET, "pv": PROTOCOL_VERSION, "sn": sn,
            "msg": {"attr": points.indices(), "data": points},
        }),
        Message::ControlAck { sn, points } => json!({
            "cmd": CMD_SET, "pv": PROTOCOL_VERSION, "res": 0, "sn": sn,
            "msg": {"data": points},
        }),
    };

    let mut bytes = frame.to_string().into_bytes();
    bytes.extend_from_slice(b"\r\n");
    bytes
}

/// Decode one wire frame.
///
/// Malformed or truncated input is rejected with a distinct [`DecodeError`];
/// unknown command codes are rejected deterministically rather than mapped
/// to a catch-all.
pub fn decode(bytes: &[u8], channel: Channel) -> Result<Message, DecodeError> {
    let text = std::str::from_utf8(bytes)?;
    let value: Value = serde_json::from_str(text.trim())?;
    let frame = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let cmd = frame
        .get("cmd")
        .and_then(Value::as_u64)
        .ok_or(DecodeError::MissingField("cmd"))?;
    let cmd = u8::try_from(cmd).map_err(|_| DecodeError::UnknownCommand(cmd))?;
    let sn = frame
        .get("sn")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField("sn"))?
        .to_string();
    let is_reply = frame.contains_key("res");
    let msg = frame
        .get("msg")
        .and_then(Value::as_object)
        .ok_or(DecodeError::MissingField("msg"))?;

    match (cmd, is_reply) {
        (CMD_INFO, false) => Ok(match channel {
            Channel::Udp => Message::DiscoverProbe { sn },
            Channel::Tcp => Message::DeviceInfoRequest { sn },
        }),
        (CMD_INFO, true) => {
            if !msg.contains_key("did") {
                return Err(DecodeError::MissingField("did"));
            }
            let meta: DeviceMeta = serde_json::from_value(Value::Object(msg.clone()))?;
            Ok(match channel {
                Channel::Udp => Message::DiscoverReply { sn, meta },
                Channel::Tcp => Message::DeviceInfoReply { sn, meta },
            })
        }
        (CMD_QUERY, false) => {
            let attrs = decode_attrs(msg.get("attr"))?;
            Ok(Message::QueryRequest { sn, attrs })
        }
        (CMD_QUERY, true) => {
            let points = decode_points(msg.get("data"))?;
            Ok(Message::QueryReply { sn, points })
        }
        (CMD_SET, false) => {
            let points = decode_points(msg.get("data"))?;
            Ok(Message::ControlRequest { sn, points })
        }
        (CMD_SET, true) => {
            // Acks may omit the data echo entirely.
            let points = match msg.get("data") {
                Some(data) => decode_points(Some(data))?,
                None => DataPointMap::new(),
            };
            Ok(Message::ControlAck { sn, points })
        }
        (other, _) => Err(DecodeError::UnknownCommand(other as u64)),
    }
}

/// Split a TCP read buffer into complete newline-delimited frames.
///
/// `chunk` is appended to `carry`; complete frames are drained out and any
/// trailing partial frame stays in `carry` for the next read.
pub fn split_frames(carry: &mut String, chunk: &str) -> Vec<String> {
    carry.push_str(chunk);
    let mut frames = Vec::new();
    while let Some(pos) = carry.find('\n') {
        let line: String = carry.drain(..=pos).collect();
        let line = line.trim();
        if !line.is_empty() {
            frames.push(line.to_string());
        }
    }
    frames
}

fn decode_attrs(attr: Option<&Value>) -> Result<Vec<u8>, DecodeError> {
    let list = attr
        .and_then(Value::as_array)
        .ok_or(DecodeError::MissingField("attr"))?;
    let mut attrs = Vec::with_capacity(list.len());
    for entry in list {
        let id = entry
            .as_u64()
            .and_then(|id| u8::try_from(id).ok())
            .ok_or_else(|| DecodeError::BadPointIndex(entry.to_string()))?;
        // 0 is the "every point" wildcard, surfaced as an empty list.
        if id == 0 {
            return Ok(Vec::new());
        }
        attrs.push(id);
    }
    Ok(attrs)
}

fn decode_points(data: Option<&Value>) -> Result<DataPointMap, DecodeError> {
    let object = data
        .and_then(Value::as_object)
        .ok_or(DecodeError::MissingField("data"))?;
    let mut points = DataPointMap::new();
    for (key, value) in object {
        let index: u8 = key
            .parse()
            .map_err(|_| DecodeError::BadPointIndex(key.clone()))?;
        let value = match value {
            Value::Bool(b) => DpValue::Bool(*b),
            Value::Number(n) => DpValue::Int(n.as_i64().ok_or(DecodeError::BadPointValue(index))?),
            _ => return Err(DecodeError::BadPointValue(index)),
        };
        points.insert(index, value);
    }
    Ok(points)
}
