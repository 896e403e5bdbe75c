//! The JSON value model is an external collaborator (spec.md §1): this crate
//! consumes `serde_json` rather than reimplementing a value type. Object
//! member order is preserved because the crate is built with the
//! `preserve_order` feature on `serde_json`.

/// A single JSON value, as carried over the wire.
pub type JsonValue = serde_json::Value;

/// A JSON object (the only top-level shape a [`Message`] may take).
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// A wire message: exactly one JSON object. Arrays and bare scalars are
/// rejected by the framer (spec.md §3, §9 "empty array/top-level non-objects").
pub type Message = JsonObject;

/// Returns an empty object, used as the canonical "nothing to return" value
/// for `read_message` and malformed-input recovery (spec.md §4.A, §7).
pub fn empty_message() -> Message {
    JsonObject::new()
}

/// True iff `value` is a JSON object (the only top-level shape accepted on
/// the wire).
pub fn is_message(value: &JsonValue) -> bool {
    value.is_object()
}

/// Clone `value` with `key` set to `inserted`, used to stamp an endpoint
/// name into an outbound object without mutating the caller's copy.
pub fn value_with_key(value: &JsonValue, key: &str, inserted: JsonValue) -> JsonValue {
    let mut obj = value.as_object().cloned().unwrap_or_default();
    obj.insert(key.to_owned(), inserted);
    JsonValue::Object(obj)
}
