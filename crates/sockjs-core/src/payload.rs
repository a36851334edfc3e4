use serde_json::Value;

use crate::error::PayloadError;

/// Decode the body of a send-type request into individual messages.
///
/// A JSON array yields one message per element; a bare scalar or object
/// yields a single message. Non-string elements are re-serialized to
/// their JSON text so the application always receives strings.
pub fn decode(body: &str) -> Result<Vec<String>, PayloadError> {
    if body.trim().is_empty() {
        return Err(PayloadError::Expected);
    }
    let value: Value = serde_json::from_str(body).map_err(|_| PayloadError::BrokenJson)?;
    match value {
        Value::Array(items) => Ok(items.into_iter().map(stringify).collect()),
        other => Ok(vec![stringify(other)]),
    }
}

/// Decode a single WebSocket text frame. One frame carries exactly one
/// JSON value, never an array wrapper.
pub fn decode_single(text: &str) -> Result<String, PayloadError> {
    if text.is_empty() {
        return Err(PayloadError::Expected);
    }
    let value: Value = serde_json::from_str(text).map_err(|_| PayloadError::BrokenJson)?;
    Ok(stringify(value))
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
