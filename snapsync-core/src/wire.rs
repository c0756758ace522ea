// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! JSON wire format for one call and its one result.
//!
//! A call is `{"method": <string>, "args": [...], "kwargs": {...}}` and a
//! result is `{"result": <value>}` or `{"error": <string>}`. Each message is
//! a single length-implicit JSON document. Readers stop as soon as one
//! complete document has arrived (see [`is_complete_document`]), so a
//! sender never has to half-close; EOF also ends a message.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::WireError;

/// Maximum size of one encoded call or result (1 MiB).
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// One RPC invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Call {
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl Call {
    /// Create a call with no arguments.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument, replacing any previous value for `name`.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }
}

/// Outcome of a call as carried on the wire: a value or an error message.
pub type CallResult = Result<Value, String>;

#[derive(Serialize)]
struct WireCall<'a> {
    method: &'a str,
    args: &'a [Value],
    kwargs: &'a Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum WireResult<'a> {
    Result(&'a Value),
    Error(&'a str),
}

/// Encode a call.
pub fn encode_call(call: &Call) -> Result<Vec<u8>, WireError> {
    let wire = WireCall {
        method: &call.method,
        args: &call.args,
        kwargs: &call.kwargs,
    };
    Ok(serde_json::to_vec(&wire)?)
}

/// Decode a call.
///
/// Non-JSON input is [`WireError::MalformedMessage`]; JSON that is not a call
/// object is [`WireError::Protocol`]. Absent `args`/`kwargs` decode as empty.
pub fn decode_call(bytes: &[u8]) -> Result<Call, WireError> {
    let mut object = match parse_document(bytes)? {
        Value::Object(object) => object,
        other => {
            return Err(protocol(format!(
                "call must be a JSON object, got {}",
                kind_of(&other)
            )))
        }
    };

    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        Some(other) => {
            return Err(protocol(format!(
                "method must be a string, got {}",
                kind_of(&other)
            )))
        }
        None => return Err(protocol("missing method name")),
    };

    let args = match object.remove("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(args)) => args,
        Some(other) => {
            return Err(protocol(format!(
                "args must be an array, got {}",
                kind_of(&other)
            )))
        }
    };

    let kwargs = match object.remove("kwargs") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(kwargs)) => kwargs,
        Some(other) => {
            return Err(protocol(format!(
                "kwargs must be an object, got {}",
                kind_of(&other)
            )))
        }
    };

    Ok(Call {
        method,
        args,
        kwargs,
    })
}

/// Encode a result.
pub fn encode_result(result: &CallResult) -> Result<Vec<u8>, WireError> {
    let wire = match result {
        Ok(value) => WireResult::Result(value),
        Err(message) => WireResult::Error(message),
    };
    Ok(serde_json::to_vec(&wire)?)
}

/// Decode a result, turning an error marker into [`WireError::Remote`].
pub fn decode_result(bytes: &[u8]) -> Result<Value, WireError> {
    let mut object = match parse_document(bytes)? {
        Value::Object(object) => object,
        other => {
            return Err(protocol(format!(
                "result must be a JSON object, got {}",
                kind_of(&other)
            )))
        }
    };

    match (object.remove("result"), object.remove("error")) {
        (Some(value), None) => Ok(value),
        (None, Some(Value::String(message))) => Err(WireError::Remote { message }),
        (None, Some(other)) => Err(WireError::Remote {
            message: other.to_string(),
        }),
        (Some(_), Some(_)) => Err(protocol("result carries both result and error")),
        (None, None) => Err(protocol("result carries neither result nor error")),
    }
}

/// Whether `bytes` already holds one whole JSON document.
///
/// A syntax error also counts as complete: reading further cannot repair
/// it, and decoding reports the malformed message.
pub fn is_complete_document(bytes: &[u8]) -> bool {
    let mut documents =
        serde_json::Deserializer::from_slice(bytes).into_iter::<serde::de::IgnoredAny>();
    match documents.next() {
        Some(Ok(_)) => true,
        Some(Err(e)) => !e.is_eof(),
        None => false,
    }
}

fn parse_document(bytes: &[u8]) -> Result<Value, WireError> {
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(WireError::TooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_BYTES,
        });
    }
    serde_json::from_slice(bytes).map_err(|e| WireError::MalformedMessage {
        reason: e.to_string(),
    })
}

fn protocol(reason: impl Into<String>) -> WireError {
    WireError::Protocol {
        reason: reason.into(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
