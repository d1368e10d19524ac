//! RPC messages carried in frame payloads.
//!
//! Payloads are JSON arrays in msgpack-rpc shape:
//! - request: `[0, id, method, params]`
//! - response: `[1, id, error, result]`
//! - notification: `[2, method, params]`

use bytes::BytesMut;
use serde_json::Value;

use crate::codec::encode_frame;
use crate::error::{FrameError, Result};

/// Message type tag for requests.
pub const REQUEST: u64 = 0;
/// Message type tag for responses.
pub const RESPONSE: u64 = 1;
/// Message type tag for notifications.
pub const NOTIFICATION: u64 = 2;

/// One RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: u64,
        method: String,
        params: Value,
    },
    Response {
        id: u64,
        error: Option<Value>,
        result: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl Message {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Message::Request {
            id,
            method: method.into(),
            params: params_array(params),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Message::Notification {
            method: method.into(),
            params: params_array(params),
        }
    }

    /// Response carrying either a result or an error value.
    pub fn response(id: u64, outcome: std::result::Result<Value, Value>) -> Self {
        match outcome {
            Ok(result) => Message::Response {
                id,
                error: None,
                result,
            },
            Err(error) => Message::Response {
                id,
                error: Some(error),
                result: Value::Null,
            },
        }
    }

    /// Short type name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request { .. } => "request",
            Message::Response { .. } => "response",
            Message::Notification { .. } => "notification",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Message::Request { id, method, params } => Value::Array(vec![
                REQUEST.into(),
                (*id).into(),
                method.as_str().into(),
                params.clone(),
            ]),
            Message::Response { id, error, result } => Value::Array(vec![
                RESPONSE.into(),
                (*id).into(),
                error.clone().unwrap_or(Value::Null),
                result.clone(),
            ]),
            Message::Notification { method, params } => Value::Array(vec![
                NOTIFICATION.into(),
                method.as_str().into(),
                params.clone(),
            ]),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(mut parts) = value else {
            return Err(FrameError::Malformed("message must be an array".to_string()));
        };
        let tag = parts
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| FrameError::Malformed("message type must be an integer".to_string()))?;

        match (tag, parts.len()) {
            (REQUEST, 4) => {
                let params = expect_params(parts.pop())?;
                let method = expect_method(parts.pop())?;
                let id = expect_id(parts.pop())?;
                Ok(Message::Request { id, method, params })
            }
            (RESPONSE, 4) => {
                let result = parts.pop().unwrap_or(Value::Null);
                let error = parts.pop().filter(|e| !e.is_null());
                let id = expect_id(parts.pop())?;
                Ok(Message::Response { id, error, result })
            }
            (NOTIFICATION, 3) => {
                let params = expect_params(parts.pop())?;
                let method = expect_method(parts.pop())?;
                Ok(Message::Notification { method, params })
            }
            (REQUEST | RESPONSE | NOTIFICATION, len) => Err(FrameError::Malformed(format!(
                "message type {tag} has {len} elements"
            ))),
            _ => Err(FrameError::Malformed(format!("unknown message type {tag}"))),
        }
    }
}

/// Coerce call parameters into the array form the protocol requires.
///
/// `null` becomes `[]`; any other non-array value becomes a one-element array.
pub fn params_array(params: Value) -> Value {
    match params {
        Value::Null => Value::Array(Vec::new()),
        Value::Array(_) => params,
        other => Value::Array(vec![other]),
    }
}

fn expect_id(value: Option<Value>) -> Result<u64> {
    value
        .as_ref()
        .and_then(Value::as_u64)
        .ok_or_else(|| FrameError::Malformed("message id must be an unsigned integer".to_string()))
}

fn expect_method(value: Option<Value>) -> Result<String> {
    match value {
        Some(Value::String(method)) => Ok(method),
        _ => Err(FrameError::Malformed("method must be a string".to_string())),
    }
}

fn expect_params(value: Option<Value>) -> Result<Value> {
    match value {
        Some(params @ Value::Array(_)) => Ok(params),
        _ => Err(FrameError::Malformed("params must be an array".to_string())),
    }
}

/// Serialize and frame a message.
pub fn encode_message(message: &Message, dst: &mut BytesMut) -> Result<()> {
    let payload = serde_json::to_vec(&message.to_value())?;
    encode_frame(&payload, dst)
}

/// Parse one frame payload into a message.
pub fn parse_message(payload: &[u8]) -> Result<Message> {
    let value: Value = serde_json::from_slice(payload)?;
    Message::from_value(value)
}
