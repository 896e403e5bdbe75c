//! Component B: pure encode functions plus the "commit to Qbjs on first
//! send" rule (spec.md §4.B).

use crate::format::Format;
use crate::framing::{bson_codec, qbjs, text};
use crate::value::JsonValue;

/// Errors encoding one message.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("value is not a JSON object")]
    NotAnObject,
    #[error("BSON encoding failed: {0}")]
    Bson(#[from] crate::framing::bson_codec::BsonEncodeError),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode `obj` into `format`'s wire bytes.
///
/// `format` must already be resolved (not [`Format::Undefined`]) — the
/// "commit to Qbjs on first send" rule lives in [`resolve_outbound_format`],
/// which callers (`Stream::send`) run once before the first encode.
pub fn encode(obj: &JsonValue, format: Format) -> Result<Vec<u8>, EncodeError> {
    if !obj.is_object() {
        return Err(EncodeError::NotAnObject);
    }
    Ok(match format {
        Format::Bson => bson_codec::encode(obj)?,
        Format::Qbjs => qbjs::encode(&serde_json::to_string(obj)?),
        Format::Undefined => {
            // Caller should have resolved this; fall back to the same
            // default the commit rule would have chosen.
            qbjs::encode(&serde_json::to_string(obj)?)
        }
        text_format => text::encode(&serde_json::to_string(obj)?, text_format),
    })
}

/// If `current` is [`Format::Undefined`], spec.md §4.B says the first
/// `send` commits the stream to Qbjs. Returns the format to actually use
/// and record.
pub fn resolve_outbound_format(current: Format) -> Format {
    match current {
        Format::Undefined => Format::Qbjs,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn undefined_commits_to_qbjs() {
        assert_eq!(resolve_outbound_format(Format::Undefined), Format::Qbjs);
        assert_eq!(resolve_outbound_format(Format::Utf8), Format::Utf8);
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            encode(&json!([1, 2, 3]), Format::Utf8),
            Err(EncodeError::NotAnObject)
        ));
    }

    #[test]
    fn encodes_an_object_in_every_format() {
        let obj = json!({"a": 1});
        for format in [
            Format::Utf8,
            Format::Utf16BE,
            Format::Utf16LE,
            Format::Utf32BE,
            Format::Utf32LE,
            Format::Qbjs,
            Format::Bson,
        ] {
            assert!(!encode(&obj, format).unwrap().is_empty());
        }
    }
}
