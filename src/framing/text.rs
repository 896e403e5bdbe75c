//! The brace/string-counting scanner shared by the five text formats
//! (Utf8, Utf16BE/LE, Utf32BE/LE). Operates on "code units" of 1, 2, or 4
//! bytes so the same state machine drives all five encodings (spec.md §4.A).

use crate::format::Format;

#[derive(Clone, Copy)]
enum CharState {
    Normal,
    InString,
    InBackslash,
}

/// Unit size in bytes and endianness for a text [`Format`]. `None` for
/// binary formats.
fn unit_layout(format: Format) -> Option<(usize, bool)> {
    match format {
        Format::Utf8 => Some((1, true)),
        Format::Utf16BE => Some((2, true)),
        Format::Utf16LE => Some((2, false)),
        Format::Utf32BE => Some((4, true)),
        Format::Utf32LE => Some((4, false)),
        Format::Qbjs | Format::Bson | Format::Undefined => None,
    }
}

fn read_unit(buf: &[u8], unit_index: usize, unit_size: usize, big_endian: bool) -> Option<u32> {
    let start = unit_index.checked_mul(unit_size)?;
    let end = start.checked_add(unit_size)?;
    let bytes = buf.get(start..end)?;
    Some(match unit_size {
        1 => bytes[0] as u32,
        2 => {
            let arr = [bytes[0], bytes[1]];
            if big_endian { u16::from_be_bytes(arr) as u32 } else { u16::from_le_bytes(arr) as u32 }
        }
        4 => {
            let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
            if big_endian { u32::from_be_bytes(arr) } else { u32::from_le_bytes(arr) }
        }
        _ => unreachable!(),
    })
}

/// Scan `buf` for the next complete `{...}` frame under `format`'s unit
/// layout. Returns the byte range `[start, end)` of the frame (inclusive of
/// both braces) if one is fully buffered, `None` otherwise.
///
/// Any code unit outside a JSON string that is not `{`, `}`, or `"` is
/// simply passed over in `Normal` state — this is what makes inter-message
/// whitespace (or, harmlessly, any other stray bytes) transparent to the
/// scanner without separate whitespace-skipping logic (spec.md §4.A).
pub fn find_frame(buf: &[u8], format: Format) -> Option<(usize, usize)> {
    let (unit_size, big_endian) = unit_layout(format)?;
    let mut state = CharState::Normal;
    let mut depth: u32 = 0;
    let mut msg_start: Option<usize> = None;

    let mut unit_index = 0usize;
    loop {
        let Some(v) = read_unit(buf, unit_index, unit_size, big_endian) else {
            return None; // ran out of buffered bytes before the frame closed
        };
        match state {
            CharState::Normal => {
                if v == u32::from(b'"') {
                    state = CharState::InString;
                } else if v == u32::from(b'{') {
                    if depth == 0 {
                        msg_start = Some(unit_index);
                    }
                    depth += 1;
                } else if v == u32::from(b'}') {
                    if depth > 0 {
                        depth -= 1;
                        if depth == 0 {
                            let start = msg_start.unwrap_or(unit_index) * unit_size;
                            let end = (unit_index + 1) * unit_size;
                            return Some((start, end));
                        }
                    }
                }
            }
            CharState::InString => {
                if v == u32::from(b'"') {
                    state = CharState::Normal;
                } else if v == u32::from(b'\\') {
                    state = CharState::InBackslash;
                }
            }
            CharState::InBackslash => {
                state = CharState::InString;
            }
        }
        unit_index += 1;
    }
}

/// Decode a byte range under `format` into a UTF-8 `String` for handing to
/// the JSON parser. Returns `None` on malformed encoding (spec.md §7: a
/// malformed payload yields an empty object, the stream itself is not torn
/// down). Surrogate validity inside JSON string literals is intentionally
/// not checked here (spec.md §9 open question).
pub fn decode(bytes: &[u8], format: Format) -> Option<String> {
    match format {
        Format::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
        Format::Utf16BE | Format::Utf16LE => {
            let big_endian = format == Format::Utf16BE;
            if bytes.len() % 2 != 0 {
                return None;
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| {
                    let arr = [c[0], c[1]];
                    if big_endian { u16::from_be_bytes(arr) } else { u16::from_le_bytes(arr) }
                })
                .collect();
            char::decode_utf16(units)
                .collect::<Result<String, _>>()
                .ok()
        }
        Format::Utf32BE | Format::Utf32LE => {
            let big_endian = format == Format::Utf32BE;
            if bytes.len() % 4 != 0 {
                return None;
            }
            let mut s = String::with_capacity(bytes.len() / 4);
            for c in bytes.chunks_exact(4) {
                let arr = [c[0], c[1], c[2], c[3]];
                let v = if big_endian { u32::from_be_bytes(arr) } else { u32::from_le_bytes(arr) };
                s.push(char::from_u32(v)?);
            }
            Some(s)
        }
        Format::Qbjs | Format::Bson | Format::Undefined => None,
    }
}

/// Encode `text` (already-serialized JSON) into `format`'s wire bytes.
/// The BOM a naive transcoder would emit is never written (spec.md §4.B) —
/// callers never see one because these encoders simply don't emit it.
pub fn encode(text: &str, format: Format) -> Vec<u8> {
    match format {
        Format::Utf8 => text.as_bytes().to_vec(),
        Format::Utf16BE | Format::Utf16LE => {
            let big_endian = format == Format::Utf16BE;
            let mut out = Vec::with_capacity(text.len() * 2);
            for unit in text.encode_utf16() {
                let bytes = if big_endian { unit.to_be_bytes() } else { unit.to_le_bytes() };
                out.extend_from_slice(&bytes);
            }
            out
        }
        Format::Utf32BE | Format::Utf32LE => {
            let big_endian = format == Format::Utf32BE;
            let mut out = Vec::with_capacity(text.len() * 4);
            for ch in text.chars() {
                let v = ch as u32;
                let bytes = if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
                out.extend_from_slice(&bytes);
            }
            out
        }
        Format::Qbjs | Format::Bson | Format::Undefined => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_simple_utf8_object() {
        let buf = br#"{"a":1}"#;
        let (s, e) = find_frame(buf, Format::Utf8).unwrap();
        assert_eq!(&buf[s..e], buf.as_slice());
    }

    #[test]
    fn ignores_braces_inside_strings() {
        let buf = br#"{"a":"}{"}"#;
        let (s, e) = find_frame(buf, Format::Utf8).unwrap();
        assert_eq!(&buf[s..e], buf.as_slice());
    }

    #[test]
    fn ignores_escaped_quote_before_closing_brace() {
        let buf = br#"{"a":"\""}"#;
        let (s, e) = find_frame(buf, Format::Utf8).unwrap();
        assert_eq!(&buf[s..e], buf.as_slice());
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let buf = br#"{"a":1"#;
        assert!(find_frame(buf, Format::Utf8).is_none());
    }

    #[test]
    fn round_trips_all_text_formats() {
        for format in [
            Format::Utf8,
            Format::Utf16BE,
            Format::Utf16LE,
            Format::Utf32BE,
            Format::Utf32LE,
        ] {
            let text = r#"{"x":"hi","n":2}"#;
            let bytes = encode(text, format);
            let (s, e) = find_frame(&bytes, format).expect("frame found");
            let decoded = decode(&bytes[s..e], format).expect("decodes");
            assert_eq!(decoded, text);
        }
    }
}
