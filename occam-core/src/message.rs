use serde_json::Value;

use crate::error::Result;

/// A decoded event message. The engine never interprets fields beyond key
/// lookup and string comparison; everything else is up to the checks.
pub type Message = serde_json::Map<String, Value>;

/// Decode a raw message popped from the shared log. Anything that is not a
/// JSON object is rejected.
pub fn decode(raw: &[u8]) -> Result<Message> {
    Ok(serde_json::from_slice(raw)?)
}

/// String rendering of a message field, used to extend keyed rate
/// fingerprints. Absent fields render as `"dummy"` so that messages missing
/// the key share one window instead of erroring.
pub(crate) fn field_string(msg: &Message, field: &str) -> String {
    match msg.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => "dummy".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_non_objects() {
        assert!(decode(br#"{"a": "x"}"#).is_ok());
        assert!(decode(br#"["a"]"#).is_err());
        assert!(decode(b"{not json").is_err());
    }

    #[test]
    fn field_string_falls_back_to_dummy() {
        let msg = decode(br#"{"user": "alice", "count": 3}"#).unwrap();
        assert_eq!(field_string(&msg, "user"), "alice");
        assert_eq!(field_string(&msg, "count"), "3");
        assert_eq!(field_string(&msg, "missing"), "dummy");
    }
}
