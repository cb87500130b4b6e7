use serde::{Deserialize, de::IgnoredAny};

/// Returns `true` when `payload` is a complete JSON document of any shape.
///
/// The value is parsed only to classify it; nothing is kept, and the caller
/// relays the original text untouched. Nesting depth is unbounded: skipping a
/// value walks it with an explicit stack, not recursion.
pub fn is_valid(payload: &str) -> bool {
    let mut de = serde_json::Deserializer::from_str(payload);
    de.disable_recursion_limit();
    IgnoredAny::deserialize(&mut de).is_ok() && de.end().is_ok()
}

/// Strict UTF-8 decode for binary frames. Undecodable bytes are not a payload.
pub fn decode(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes).ok()
}
