//! Qbjs: a fixed-tag, 12-byte-header binary JSON frame (spec.md §4.A, §6).
//!
//! Layout: bytes 0..4 = [`crate::format::QBJS_TAG`], bytes 4..8 reserved
//! (zero), bytes 8..12 = little-endian u32 payload length. The payload is
//! the compact JSON-text serialization of the object — this crate does not
//! attempt to reproduce Qt's internal binary-JSON tree layout (spec.md §9).

use crate::format::QBJS_TAG;

pub const HEADER_LEN: usize = 12;

/// Encode `json_text` as one Qbjs frame.
pub fn encode(json_text: &str) -> Vec<u8> {
    let payload = json_text.as_bytes();
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&QBJS_TAG);
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// If a full frame is buffered, returns `(frame_end, payload_text)`.
/// Returns `None` if fewer than [`HEADER_LEN`] bytes are buffered yet, or
/// the header declares a payload longer than what has arrived so far.
pub fn try_extract(buf: &[u8]) -> Option<(usize, &str)> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let len_bytes: [u8; 4] = buf[8..12].try_into().ok()?;
    let payload_len = u32::from_le_bytes(len_bytes) as usize;
    let frame_end = HEADER_LEN.checked_add(payload_len)?;
    if buf.len() < frame_end {
        return None;
    }
    let text = std::str::from_utf8(&buf[HEADER_LEN..frame_end]).ok()?;
    Some((frame_end, text))
}
