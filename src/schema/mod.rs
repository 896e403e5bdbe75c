//! Component K: [`SchemaValidator`] — a named schema repository with lazy
//! compilation and a unique-key matcher acceleration (spec.md §4.K).

pub mod compile;
pub mod matcher;

use std::path::Path;
use std::sync::Mutex as StdMutex;

use crate::schema::compile::{CompiledSchema, SchemaRepository};
use crate::schema::matcher::{NameMatcher, UniqueKeyIndex};
use crate::value::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    WarnIfInvalid,
    DropIfInvalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("no error")]
    NoError,
    #[error("schema validation failed")]
    FailedSchemaValidation,
    #[error("invalid schema operation")]
    InvalidSchemaOperation,
    #[error("object is not valid JSON")]
    InvalidObject,
    #[error("failed to open/read schema file")]
    FailedSchemaFileOpenRead,
    #[error("invalid schema folder")]
    InvalidSchemaFolder,
    #[error("invalid schema loading")]
    InvalidSchemaLoading,
    #[error("wrong parameter type for schema operation")]
    SchemaWrongParamType,
    #[error("wrong parameter value for schema operation")]
    SchemaWrongParamValue,
}

/// How a loaded schema's name is determined (spec.md §4.K).
pub enum NameMode<'a> {
    /// Basename of the file, without extension.
    UseFilename,
    /// The name passed explicitly to the loader.
    UseParameter(&'a str),
    /// The value at `schema[key]`.
    UseProperty(&'a str),
}

struct Entry {
    source: JsonValue,
    compiled: StdMutex<Option<std::sync::Arc<CompiledSchema>>>,
}

/// Map schema-name → (source, lazily-compiled schema), plus a pluggable
/// [`NameMatcher`] accelerating unnamed lookups (spec.md §4.K: "an optional
/// `name_matcher`").
pub struct SchemaValidator {
    schemas: std::collections::HashMap<String, Entry>,
    matcher: Box<dyn NameMatcher>,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    /// A validator with the unique-key-index matcher, the built-in spec.md
    /// describes as the default scanning optimization.
    pub fn new() -> Self {
        SchemaValidator { schemas: std::collections::HashMap::new(), matcher: Box::new(UniqueKeyIndex::new()) }
    }

    /// Swap in a different `name_matcher` (e.g. [`matcher::PropertyNameMatcher`]).
    /// Call before loading schemas: existing entries are not retroactively
    /// re-indexed against the new matcher.
    pub fn with_name_matcher(mut self, matcher: Box<dyn NameMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn load_from_data(&mut self, bytes: &[u8], name: &str) -> Result<(), SchemaError> {
        let value: JsonValue = serde_json::from_slice(bytes).map_err(|_| SchemaError::InvalidSchemaLoading)?;
        self.matcher.index(name, &value);
        self.schemas.insert(name.to_owned(), Entry { source: value, compiled: StdMutex::new(None) });
        Ok(())
    }

    pub fn load_from_file(&mut self, path: &Path, mode: NameMode<'_>) -> Result<(), SchemaError> {
        let bytes = std::fs::read(path).map_err(|_| SchemaError::FailedSchemaFileOpenRead)?;
        let value: JsonValue = serde_json::from_slice(&bytes).map_err(|_| SchemaError::InvalidSchemaLoading)?;
        let name = match mode {
            NameMode::UseFilename => path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or(SchemaError::SchemaWrongParamValue)?
                .to_owned(),
            NameMode::UseParameter(name) => name.to_owned(),
            NameMode::UseProperty(key) => value
                .get(key)
                .and_then(JsonValue::as_str)
                .ok_or(SchemaError::SchemaWrongParamValue)?
                .to_owned(),
        };
        self.matcher.index(&name, &value);
        self.schemas.insert(name, Entry { source: value, compiled: StdMutex::new(None) });
        Ok(())
    }

    /// Load every `*.{ext}` file in `dir`. `name_key`, when given, uses
    /// `UseProperty`; otherwise falls back to `UseFilename`.
    pub fn load_from_folder(dir: &Path, name_key: Option<&str>, ext: &str) -> Result<Self, SchemaError> {
        let entries = std::fs::read_dir(dir).map_err(|_| SchemaError::InvalidSchemaFolder)?;
        let mut validator = SchemaValidator::new();
        for entry in entries {
            let entry = entry.map_err(|_| SchemaError::InvalidSchemaFolder)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            let mode = match name_key {
                Some(key) => NameMode::UseProperty(key),
                None => NameMode::UseFilename,
            };
            validator.load_from_file(&path, mode)?;
        }
        Ok(validator)
    }

    /// Validate `obj` against the named schema, compiling it on first use.
    /// A `$ref` inside this schema resolves by name against this same
    /// repository.
    pub fn validate_schema(&self, name: &str, obj: &JsonValue) -> Result<bool, SchemaError> {
        let entry = self.schemas.get(name).ok_or(SchemaError::InvalidSchemaOperation)?;
        let compiled = self.compiled_schema(entry)?;
        Ok(compiled.validate_with_repo(obj, Some(self)))
    }

    /// `obj` with any property missing against the named schema filled in
    /// from that schema's `default` (spec.md §4.K default-value propagation).
    pub fn complete_defaults(&self, name: &str, obj: &JsonValue) -> Result<JsonValue, SchemaError> {
        let entry = self.schemas.get(name).ok_or(SchemaError::InvalidSchemaOperation)?;
        let compiled = self.compiled_schema(entry)?;
        Ok(compiled.apply_defaults(obj))
    }

    fn compiled_schema(&self, entry: &Entry) -> Result<std::sync::Arc<CompiledSchema>, SchemaError> {
        let mut slot = entry.compiled.lock().unwrap();
        if let Some(compiled) = slot.as_ref() {
            return Ok(std::sync::Arc::clone(compiled));
        }
        let compiled =
            std::sync::Arc::new(CompiledSchema::compile(&entry.source).map_err(|_| SchemaError::InvalidSchemaLoading)?);
        *slot = Some(std::sync::Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Validate `obj` without a name: exact matches from the unique-key
    /// index first, then every remaining schema, stopping at the first
    /// success (spec.md §4.K, scenario S6).
    pub fn validate_schema_any(&self, obj: &JsonValue) -> bool {
        if let Some(candidates) = self.matcher.candidates(obj) {
            if candidates.iter().any(|name| self.validate_schema(name, obj).unwrap_or(false)) {
                return true;
            }
            return false;
        }
        self.schemas.keys().any(|name| self.validate_schema(name, obj).unwrap_or(false))
    }
}

impl SchemaRepository for SchemaValidator {
    fn resolve_ref(&self, name: &str, value: &JsonValue) -> bool {
        self.validate_schema(name, value).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lazy_compile_and_validate_by_name() {
        let mut validator = SchemaValidator::new();
        validator
            .load_from_data(
                br#"{"type":"object","properties":{"n":{"type":"number","minimum":0}}}"#,
                "positive",
            )
            .unwrap();
        assert!(validator.validate_schema("positive", &json!({"n": 1})).unwrap());
        assert!(!validator.validate_schema("positive", &json!({"n": -1})).unwrap());
    }

    #[test]
    fn unknown_schema_name_is_an_error() {
        let validator = SchemaValidator::new();
        assert_eq!(
            validator.validate_schema("missing", &json!({})).unwrap_err(),
            SchemaError::InvalidSchemaOperation
        );
    }

    #[test]
    fn s6_unique_key_match_validates_only_matching_schema() {
        let mut validator = SchemaValidator::new();
        validator
            .load_from_data(
                br#"{"properties":{"event":{"type":"string","required":true,"pattern":"PaintTextEvent"}}}"#,
                "Paint",
            )
            .unwrap();
        validator
            .load_from_data(
                br#"{"properties":{"event":{"type":"string","required":true,"pattern":"ResetEvent"}}}"#,
                "Reset",
            )
            .unwrap();

        assert!(validator.validate_schema_any(&json!({"event": "PaintTextEvent", "text": "hi", "font-size": 12})));
    }

    #[test]
    fn idempotent_validation() {
        let mut validator = SchemaValidator::new();
        validator.load_from_data(br#"{"type":"string"}"#, "s").unwrap();
        let obj = json!("hello");
        assert_eq!(validator.validate_schema("s", &obj), validator.validate_schema("s", &obj));
    }

    #[test]
    fn ref_resolves_against_sibling_schemas_in_the_same_repository() {
        let mut validator = SchemaValidator::new();
        validator.load_from_data(br#"{"type":"number","minimum":0}"#, "amount").unwrap();
        validator
            .load_from_data(br#"{"properties":{"total":{"$ref":"amount"}}}"#, "invoice")
            .unwrap();

        assert!(validator.validate_schema("invoice", &json!({"total": 5})).unwrap());
        assert!(!validator.validate_schema("invoice", &json!({"total": -5})).unwrap());
    }

    #[test]
    fn complete_defaults_fills_in_missing_properties() {
        let mut validator = SchemaValidator::new();
        validator
            .load_from_data(br#"{"properties":{"retries":{"type":"number","default":3}}}"#, "job")
            .unwrap();
        let filled = validator.complete_defaults("job", &json!({})).unwrap();
        assert_eq!(filled, json!({"retries": 3}));
    }

    #[test]
    fn property_name_matcher_is_pluggable() {
        let mut validator =
            SchemaValidator::new().with_name_matcher(Box::new(matcher::PropertyNameMatcher::new("kind")));
        validator.load_from_data(br#"{"properties":{"kind":{"type":"string"}}}"#, "widget").unwrap();
        assert!(validator.validate_schema_any(&json!({"kind": "widget"})));
    }
}
