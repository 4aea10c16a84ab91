//! Payload → [`ProgressEvent`] decoding.
//!
//! Anything that is not a well-formed event of a known kind comes back as a
//! [`DecodeError`]; callers drop it and keep consuming the stream.

use serde_json::Value;
use shared::protocol::ProgressEvent;

use crate::error::DecodeError;

pub fn decode_payload(raw: &str) -> Result<ProgressEvent, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(DecodeError::Malformed)?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<ProgressEvent, DecodeError> {
    let Some(object) = value.as_object() else {
        return Err(DecodeError::NotAnObject);
    };
    let Some(kind) = object.get("type").and_then(Value::as_str) else {
        return Err(DecodeError::MissingDiscriminant);
    };
    if !ProgressEvent::is_known_kind(kind) {
        return Err(DecodeError::UnknownKind(kind.to_string()));
    }
    let kind = kind.to_string();

    serde_json::from_value(value).map_err(|source| DecodeError::InvalidFields { kind, source })
}

#[cfg(test)]
#[path = "tests/decoder_tests.rs"]
mod tests;
