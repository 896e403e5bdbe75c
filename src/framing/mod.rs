//! Component A: [`FramingBuffer`] — an append-only byte buffer plus the
//! small state machine that emits whole JSON objects (spec.md §4.A).

pub mod bson_codec;
pub mod qbjs;
pub mod text;

use crate::format::{self, Format};
use crate::value::{self, JsonObject, Message};

/// Outcome of an [`FramingBuffer::append`] call.
pub struct AppendOutcome {
    pub bytes_appended: usize,
    /// True iff this append call caused a message to become newly
    /// available (spec.md §4.A: "at-most-once `message_ready` notification
    /// per append call").
    pub message_ready: bool,
}

/// Append-only buffer + streaming object extractor for one [`Format`].
pub struct FramingBuffer {
    format: Format,
    buf: Vec<u8>,
    enabled: bool,
    /// A fully parsed, not-yet-consumed message. Spec.md §3's "at most one
    /// parsed-but-unread object at a time" invariant is literally this
    /// field: we never hold more than one.
    pending: Option<Message>,
}

impl Default for FramingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FramingBuffer {
    pub fn new() -> Self {
        FramingBuffer { format: Format::Undefined, buf: Vec::new(), enabled: true, pending: None }
    }

    /// Construct a buffer whose format is already known (used on the
    /// outbound side once a `Stream` has committed to a format).
    pub fn with_format(format: Format) -> Self {
        FramingBuffer { format, buf: Vec::new(), enabled: true, pending: None }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of buffered, not-yet-extracted bytes.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.format = Format::Undefined;
        self.pending = None;
    }

    /// Append `bytes` to the buffer. Returns whether this call caused a
    /// message to become newly ready (only meaningful, and only ever true,
    /// when the buffer is enabled).
    pub fn append(&mut self, bytes: &[u8]) -> AppendOutcome {
        let was_ready = self.pending.is_some();
        self.buf.extend_from_slice(bytes);
        let bytes_appended = bytes.len();
        let is_ready = self.enabled && self.message_available();
        AppendOutcome { bytes_appended, message_ready: !was_ready && is_ready }
    }

    /// Advance parsing as needed; true iff a complete object is buffered.
    pub fn message_available(&mut self) -> bool {
        if self.pending.is_some() {
            return true;
        }
        self.pending = self.extract_next();
        self.pending.is_some()
    }

    /// Return and remove the next whole object, or an empty object if none
    /// is available (spec.md §4.A).
    pub fn read_message(&mut self) -> Message {
        if self.pending.is_none() {
            self.message_available();
        }
        self.pending.take().unwrap_or_else(value::empty_message)
    }

    /// Detect format (if undefined) and find + drain the next message from
    /// the raw buffer, discarding non-object top-level values and malformed
    /// frames per spec.md §9 and §7. Returns `None` only when no complete
    /// frame is buffered yet. Does not touch `self.pending` — callers cache
    /// the result there.
    fn extract_next(&mut self) -> Option<Message> {
        loop {
            if self.format == Format::Undefined {
                let detection = format::detect(&self.buf)?;
                self.format = detection.format;
                self.buf.drain(0..detection.skip);
            }

            let extracted = match self.format {
                Format::Qbjs => qbjs::try_extract(&self.buf)
                    .map(|(end, text)| (end, serde_json::from_str::<serde_json::Value>(text).ok())),
                Format::Bson => bson_codec::try_extract(&self.buf).map(|(end, v)| (end, v)),
                Format::Undefined => unreachable!("format resolved above"),
                text_format => {
                    let (start, end) = text::find_frame(&self.buf, text_format)?;
                    let decoded = text::decode(&self.buf[start..end], text_format)
                        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok());
                    Some((end, decoded))
                }
            };

            let (frame_end, parsed) = extracted?;

            self.buf.drain(0..frame_end);

            match parsed {
                Some(serde_json::Value::Object(obj)) => return Some(obj),
                Some(_non_object) => {
                    tracing::debug!("discarding non-object top-level JSON value");
                    continue; // spec.md §9: discard, keep scanning for the next frame
                }
                None => {
                    tracing::warn!(format = ?self.format, "malformed frame, yielding empty object");
                    return Some(JsonObject::new());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn s1_utf8_detect_and_echo() {
        let mut fb = FramingBuffer::new();
        let bytes = [0x7Bu8, 0x22, 0x61, 0x22, 0x3A, 0x31, 0x7D]; // {"a":1}
        fb.append(&bytes);
        assert_eq!(fb.format(), Format::Utf8);
        assert!(fb.message_available());
        let msg = fb.read_message();
        assert_eq!(serde_json::Value::Object(msg), json!({"a": 1}));
        assert_eq!(fb.buffered_len(), 0);
    }

    #[test]
    fn s2_qbjs_header() {
        let frame = qbjs::encode(r#"{"x":"hi"}"#);
        let mut fb = FramingBuffer::new();
        fb.append(&frame);
        assert_eq!(fb.format(), Format::Qbjs);
        let msg = fb.read_message();
        assert_eq!(serde_json::Value::Object(msg), json!({"x": "hi"}));
    }

    #[test]
    fn concatenated_messages_extract_in_order() {
        let mut fb = FramingBuffer::new();
        fb.append(br#"{"a":1}  {"a":2}{"a":3}"#);
        let mut results = Vec::new();
        while fb.message_available() {
            results.push(fb.read_message().get("a").cloned());
        }
        assert_eq!(
            results,
            vec![Some(json!(1)), Some(json!(2)), Some(json!(3))]
        );
    }

    #[test]
    fn chunking_invariance() {
        let whole = br#"{"a":1}{"b":2}{"c":3}"#;
        for chunk_size in [1usize, 2, 3, 5, 7, 1000] {
            let mut fb = FramingBuffer::new();
            let mut results = Vec::new();
            for chunk in whole.chunks(chunk_size) {
                fb.append(chunk);
                while fb.message_available() {
                    results.push(fb.read_message());
                }
            }
            assert_eq!(
                results,
                vec![
                    JsonObject::from_iter([("a".to_owned(), json!(1))]),
                    JsonObject::from_iter([("b".to_owned(), json!(2))]),
                    JsonObject::from_iter([("c".to_owned(), json!(3))]),
                ],
                "chunk_size={chunk_size}"
            );
        }
    }

    #[test]
    fn bom_tolerance_utf16be() {
        let mut fb = FramingBuffer::new();
        let mut bytes = vec![0xFE, 0xFF]; // UTF-16 BE BOM
        bytes.extend_from_slice(&text::encode(r#"{"a":1}"#, Format::Utf16BE));
        fb.append(&bytes);
        assert_eq!(fb.format(), Format::Utf16BE);
        assert_eq!(serde_json::Value::Object(fb.read_message()), json!({"a": 1}));
    }

    #[test]
    fn non_object_top_level_is_discarded() {
        let mut fb = FramingBuffer::new();
        fb.append(br#"[1,2,3]{"ok":true}"#);
        assert_eq!(serde_json::Value::Object(fb.read_message()), json!({"ok": true}));
    }

    #[test]
    fn malformed_utf8_yields_empty_object_and_continues() {
        let mut fb = FramingBuffer::new();
        // Invalid UTF-8 continuation byte inside an otherwise well-formed frame.
        let mut bad = vec![b'{', b'"', 0xFF, b'"', b':', b'1', b'}'];
        bad.extend_from_slice(br#"{"ok":true}"#);
        fb.append(&bad);
        assert_eq!(fb.read_message(), JsonObject::new());
        assert_eq!(serde_json::Value::Object(fb.read_message()), json!({"ok": true}));
    }

    #[test]
    fn disabled_buffer_suppresses_message_ready() {
        let mut fb = FramingBuffer::new();
        fb.set_enabled(false);
        let outcome = fb.append(br#"{"a":1}"#);
        assert!(!outcome.message_ready);
    }

    #[test]
    fn clear_discards_buffered_bytes_and_format() {
        let mut fb = FramingBuffer::new();
        fb.append(br#"{"a":1"#);
        fb.clear();
        assert_eq!(fb.buffered_len(), 0);
        assert_eq!(fb.format(), Format::Undefined);
    }
}
