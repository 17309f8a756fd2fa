//! HTTP request handlers.

pub mod approval;
pub mod execution;
pub mod hook;
pub mod workflow;

use axum::body::Bytes;
use serde_json::Value;

/// Trigger payload from a raw request body: JSON when it parses, the body
/// as a string otherwise, `null` when empty.
pub(crate) fn payload_from(body: &Bytes) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payloads() {
        assert_eq!(payload_from(&Bytes::new()), Value::Null);
        assert_eq!(payload_from(&Bytes::from_static(b"{\"a\":1}")), json!({"a": 1}));
        assert_eq!(payload_from(&Bytes::from_static(b"plain text")), json!("plain text"));
    }
}
