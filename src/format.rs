//! Wire format enumeration and inbound format auto-detection (spec.md §4.A).

/// The wire encoding of a message stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Not yet determined (inbound) or not yet committed (outbound).
    Undefined,
    Utf8,
    Utf16BE,
    Utf16LE,
    Utf32BE,
    Utf32LE,
    /// Fixed 4-byte-tag, 12-byte-header binary JSON frame (spec.md §6).
    Qbjs,
    /// `"bson"` sentinel followed by a length-prefixed BSON document.
    Bson,
}

impl Default for Format {
    fn default() -> Self {
        Format::Undefined
    }
}

/// The literal 4-byte tag recognized at offset 0 of a Qbjs frame.
/// Qbjs has no Rust-ecosystem equivalent; this crate defines its own tag
/// rather than attempting to replicate Qt's internal binary-JSON layout
/// (spec.md §9 design note: "treat as a third-party codec ... do not
/// re-implement its internals").
pub const QBJS_TAG: [u8; 4] = *b"QBJ1";

const BSON_SENTINEL: &[u8] = b"bson";

/// Outcome of inspecting the first few bytes of an inbound stream.
pub struct Detection {
    pub format: Format,
    /// Bytes to skip before framing begins (BOM length, 0 otherwise).
    pub skip: usize,
}

/// Attempt to classify the first bytes of a stream per spec.md §4.A.
/// Returns `None` if fewer than 4 bytes are available (decision is deferred).
pub fn detect(buf: &[u8]) -> Option<Detection> {
    if buf.len() < 4 {
        return None;
    }

    if buf.starts_with(BSON_SENTINEL) {
        return Some(Detection { format: Format::Bson, skip: 0 });
    }

    if buf[0..4] == QBJS_TAG {
        return Some(Detection { format: Format::Qbjs, skip: 0 });
    }

    // BOMs, longest first so a 2-byte UTF-16LE BOM doesn't shadow a 4-byte
    // UTF-32LE BOM that happens to share its first two bytes.
    if buf[0..4] == [0xFF, 0xFE, 0x00, 0x00] {
        return Some(Detection { format: Format::Utf32LE, skip: 4 });
    }
    if buf[0..4] == [0x00, 0x00, 0xFE, 0xFF] {
        return Some(Detection { format: Format::Utf32BE, skip: 4 });
    }
    if buf[0..2] == [0xFF, 0xFE] {
        return Some(Detection { format: Format::Utf16LE, skip: 2 });
    }
    if buf[0..2] == [0xFE, 0xFF] {
        return Some(Detection { format: Format::Utf16BE, skip: 2 });
    }
    if buf[0..3] == [0xEF, 0xBB, 0xBF] {
        return Some(Detection { format: Format::Utf8, skip: 3 });
    }

    // Zero-pattern heuristic on the first four bytes.
    let z: [bool; 4] = [buf[0] == 0, buf[1] == 0, buf[2] == 0, buf[3] == 0];
    let format = match z {
        [true, false, true, false] => Format::Utf16BE,
        [false, true, false, true] => Format::Utf16LE,
        [true, true, true, false] => Format::Utf32BE,
        [false, true, true, true] => Format::Utf32LE,
        _ => Format::Utf8,
    };
    Some(Detection { format, skip: 0 })
}
