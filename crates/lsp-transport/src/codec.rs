//! LSP base-protocol framing.
//!
//! Each frame is a block of `Name: value\r\n` headers, a blank line and a
//! JSON-RPC 2.0 body of exactly `Content-Length` bytes.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{json, Value};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Notification, TransportError};

/// Frames larger than this are rejected instead of buffered.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MAX_HEADER_LENGTH: usize = 8 * 1024;

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Head,
    Body(usize),
}

#[derive(Debug)]
pub struct LspCodec {
    state: DecodeState,
    max_frame_length: usize,
}

impl LspCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            state: DecodeState::Head,
            max_frame_length,
        }
    }

    fn decode_head(&self, src: &mut BytesMut) -> Result<Option<usize>, TransportError> {
        let Some(end) = find_terminator(src) else {
            if src.len() > MAX_HEADER_LENGTH {
                return Err(TransportError::Protocol("header block too long".into()));
            }
            return Ok(None);
        };

        let head = src.split_to(end + HEADER_TERMINATOR.len());
        let text = std::str::from_utf8(&head[..end])
            .map_err(|_| TransportError::Protocol("header block is not utf-8".into()))?;

        let mut length = None;
        for line in text.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                return Err(TransportError::Protocol(format!("malformed header line {line:?}")));
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value.trim().parse::<usize>().map_err(|_| {
                    TransportError::Protocol(format!("invalid content-length {:?}", value.trim()))
                })?;
                length = Some(parsed);
            }
        }

        let length =
            length.ok_or_else(|| TransportError::Protocol("missing content-length".into()))?;
        if length > self.max_frame_length {
            return Err(TransportError::Protocol(format!(
                "frame of {length} bytes exceeds limit of {}",
                self.max_frame_length
            )));
        }
        Ok(Some(length))
    }
}

impl Default for LspCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn find_terminator(src: &[u8]) -> Option<usize> {
    src.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

impl Decoder for LspCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Head => match self.decode_head(src)? {
                    Some(length) => {
                        src.reserve(length);
                        self.state = DecodeState::Body(length);
                    }
                    None => return Ok(None),
                },
                DecodeState::Body(length) => {
                    if src.len() < length {
                        return Ok(None);
                    }
                    self.state = DecodeState::Head;
                    return Ok(Some(src.split_to(length).freeze()));
                }
            }
        }
    }
}

impl Encoder<Bytes> for LspCodec {
    type Error = TransportError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if body.len() > self.max_frame_length {
            return Err(TransportError::Protocol(format!(
                "frame of {} bytes exceeds limit of {}",
                body.len(),
                self.max_frame_length
            )));
        }
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put(body);
        Ok(())
    }
}

/// A decoded JSON-RPC message, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Notification(Notification),
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Response {
        id: Value,
        result: Result<Value, String>,
    },
}

impl Incoming {
    pub fn parse(body: &[u8]) -> Result<Self, TransportError> {
        let mut value: Value = serde_json::from_slice(body)?;
        let Some(object) = value.as_object_mut() else {
            return Err(TransportError::Protocol("json-rpc message is not an object".into()));
        };

        let id = object.remove("id");
        let params = object.remove("params").unwrap_or(Value::Null);
        match (object.remove("method"), id) {
            (Some(Value::String(method)), None) => {
                Ok(Incoming::Notification(Notification::new(method, params)))
            }
            (Some(Value::String(method)), Some(id)) => Ok(Incoming::Request { id, method, params }),
            (Some(_), _) => Err(TransportError::Protocol("method is not a string".into())),
            (None, Some(id)) => {
                let result = match object.remove("error") {
                    Some(error) => Err(error
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                        .unwrap_or_else(|| error.to_string())),
                    None => Ok(object.remove("result").unwrap_or(Value::Null)),
                };
                Ok(Incoming::Response { id, result })
            }
            (None, None) => Err(TransportError::Protocol(
                "message has neither method nor id".into(),
            )),
        }
    }
}

pub fn encode_notification(method: &str, params: &Value) -> Result<Bytes, TransportError> {
    to_bytes(&json!({ "jsonrpc": "2.0", "method": method, "params": params }))
}

pub fn encode_request(id: u64, method: &str, params: &Value) -> Result<Bytes, TransportError> {
    to_bytes(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
}

/// JSON-RPC `MethodNotFound` (-32601) reply.
pub fn encode_method_not_found(id: &Value, method: &str) -> Result<Bytes, TransportError> {
    to_bytes(&json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": -32601, "message": format!("method not found: {method}") },
    }))
}

fn to_bytes(value: &Value) -> Result<Bytes, TransportError> {
    let mut writer = BytesMut::new().writer();
    serde_json::to_writer(&mut writer, value)?;
    Ok(writer.into_inner().freeze())
}
