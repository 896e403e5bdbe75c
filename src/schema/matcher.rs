//! Name-matcher acceleration consulted before the O(N) schema scan
//! (spec.md §4.K): a pluggable [`NameMatcher`] with two built-ins — a
//! named-property matcher, and a unique-key index that pre-buckets schemas
//! whose `properties.<key>` is a required literal string pattern.

use std::collections::HashMap;

use crate::schema::compile::CompiledSchema;
use crate::value::JsonValue;

/// Narrows `validate_schema_any` to a small candidate set before falling
/// back to the full scan. `index` is called once per loaded schema; the
/// matcher stays up to date with the repository as schemas are loaded.
pub trait NameMatcher: Send + Sync {
    fn index(&mut self, schema_name: &str, schema: &JsonValue);

    /// Candidate schema names for `obj`, or `None` if this matcher found no
    /// basis for narrowing (caller should fall back to the full scan).
    fn candidates(&self, obj: &JsonValue) -> Option<Vec<String>>;
}

/// Matches by the literal value of one named property in the object,
/// treated directly as a schema name — the simpler of spec.md §4.K's two
/// built-ins, with none of `UniqueKeyIndex`'s pattern/required bookkeeping.
pub struct PropertyNameMatcher {
    property: String,
}

impl PropertyNameMatcher {
    pub fn new(property: impl Into<String>) -> Self {
        PropertyNameMatcher { property: property.into() }
    }
}

impl NameMatcher for PropertyNameMatcher {
    fn index(&mut self, _schema_name: &str, _schema: &JsonValue) {
        // Nothing to precompute: the object's own property value *is* the
        // schema name.
    }

    fn candidates(&self, obj: &JsonValue) -> Option<Vec<String>> {
        let name = obj.as_object()?.get(&self.property)?.as_str()?;
        Some(vec![name.to_owned()])
    }
}

/// Pre-bucket schemas by a property name + the literal pattern their
/// `properties.<key>` requires, so `validate_schema(obj)` without a name can
/// jump straight to the schemas that could possibly match (spec.md S6).
#[derive(Default)]
pub struct UniqueKeyIndex {
    /// property name -> (literal value -> schema names)
    buckets: HashMap<String, HashMap<String, Vec<String>>>,
}

impl UniqueKeyIndex {
    pub fn new() -> Self {
        UniqueKeyIndex::default()
    }
}

impl NameMatcher for UniqueKeyIndex {
    /// Inspect `schema`'s top-level `properties` for any whose value
    /// requires a literal string via `pattern` (spec.md §4.K); index
    /// `schema_name` under each one found.
    fn index(&mut self, schema_name: &str, schema: &JsonValue) {
        let Some(JsonValue::Object(properties)) = schema.get("properties") else { return };
        for (prop_name, prop_schema) in properties {
            let Ok(compiled) = CompiledSchema::compile(prop_schema) else { continue };
            if let Some(literal) = compiled.unique_key_literal() {
                self.buckets
                    .entry(prop_name.clone())
                    .or_default()
                    .entry(literal.to_owned())
                    .or_default()
                    .push(schema_name.to_owned());
            }
        }
    }

    fn candidates(&self, obj: &JsonValue) -> Option<Vec<String>> {
        let obj = obj.as_object()?;
        for (prop_name, bucket) in &self.buckets {
            if let Some(JsonValue::String(value)) = obj.get(prop_name) {
                if let Some(names) = bucket.get(value) {
                    return Some(names.clone());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unique_key_index_narrows_to_matching_schema() {
        let mut index = UniqueKeyIndex::new();
        index.index(
            "paint",
            &json!({"properties": {"event": {"type": "string", "required": true, "pattern": "PaintTextEvent"}}}),
        );
        index.index(
            "reset",
            &json!({"properties": {"event": {"type": "string", "required": true, "pattern": "ResetEvent"}}}),
        );

        let candidates = index.candidates(&json!({"event": "PaintTextEvent", "text": "hi"}));
        assert_eq!(candidates, Some(vec!["paint".to_owned()]));
    }

    #[test]
    fn no_bucket_match_returns_none() {
        let mut index = UniqueKeyIndex::new();
        index.index(
            "paint",
            &json!({"properties": {"event": {"type": "string", "required": true, "pattern": "PaintTextEvent"}}}),
        );
        assert_eq!(index.candidates(&json!({"event": "Other"})), None);
    }

    #[test]
    fn property_matcher_uses_the_property_value_as_the_schema_name() {
        let matcher = PropertyNameMatcher::new("kind");
        assert_eq!(matcher.candidates(&json!({"kind": "paint", "text": "hi"})), Some(vec!["paint".to_owned()]));
        assert_eq!(matcher.candidates(&json!({"text": "hi"})), None);
    }
}
