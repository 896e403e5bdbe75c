//! BSON is consumed as an opaque third-party codec (spec.md §1, §9): this
//! module only implements the wire framing rule (`"bson"` sentinel + a
//! length-prefixed document) around the real `bson` crate.

use crate::value::JsonValue;

const SENTINEL: &[u8] = b"bson";

/// Errors encoding a [`JsonValue`] into a BSON frame.
#[derive(Debug, thiserror::Error)]
pub enum BsonEncodeError {
    #[error("value does not serialize to a BSON document: {0}")]
    Serialize(#[from] bson::ser::Error),
    #[error("failed writing BSON document: {0}")]
    Write(#[from] std::io::Error),
}

/// Encode `value` (must be a JSON object) as a `"bson"`-prefixed frame.
pub fn encode(value: &JsonValue) -> Result<Vec<u8>, BsonEncodeError> {
    let doc = bson::to_document(value)?;
    let mut out = Vec::with_capacity(SENTINEL.len() + 64);
    out.extend_from_slice(SENTINEL);
    doc.to_writer(&mut out)?;
    Ok(out)
}

/// If a full `"bson"`-prefixed document is buffered, returns
/// `(frame_end, value)`. Returns `None` while more bytes are still needed;
/// on a structurally invalid document, the sentinel+declared-length worth
/// of bytes is still the frame span, and the caller is expected to recover
/// the same way as a malformed text frame (spec.md §7).
pub fn try_extract(buf: &[u8]) -> Option<(usize, Option<JsonValue>)> {
    if buf.len() < SENTINEL.len() + 4 {
        return None;
    }
    if &buf[0..SENTINEL.len()] != SENTINEL {
        return None;
    }
    let body = &buf[SENTINEL.len()..];
    let len_bytes: [u8; 4] = body[0..4].try_into().ok()?;
    let doc_len = i32::from_le_bytes(len_bytes);
    if doc_len < 4 {
        // Malformed length; treat the sentinel + 4-byte length as the
        // whole (unusable) frame so the stream can resynchronize.
        return Some((SENTINEL.len() + 4, None));
    }
    let doc_len = doc_len as usize;
    if body.len() < doc_len {
        return None;
    }
    let frame_end = SENTINEL.len() + doc_len;
    let value = bson::Document::from_reader(&body[0..doc_len])
        .ok()
        .and_then(|doc| bson::from_document::<JsonValue>(doc).ok());
    Some((frame_end, value))
}
