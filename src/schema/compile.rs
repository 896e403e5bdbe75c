//! Lazy compilation of a draft-3 JSON Schema subset into a flat list of
//! `Check`s (spec.md §4.K): "for each recognized keyword a check is
//! created and appended to the schema's check list."

use std::collections::HashMap;

use regex::Regex;

use crate::value::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    DateTime,
    Date,
    Time,
    Url,
    Uri,
    NonNegativeInteger,
    Other,
}

impl FormatKind {
    fn parse(name: &str) -> Self {
        match name {
            "date-time" => FormatKind::DateTime,
            "date" => FormatKind::Date,
            "time" => FormatKind::Time,
            "url" => FormatKind::Url,
            "uri" => FormatKind::Uri,
            "NonNegativeInteger" => FormatKind::NonNegativeInteger,
            _ => FormatKind::Other,
        }
    }
}

enum AdditionalPolicy {
    Allow,
    Deny,
    Schema(Box<CompiledSchema>),
}

enum ItemsPolicy {
    Any,
    Single(Box<CompiledSchema>),
    Tuple(Vec<CompiledSchema>),
}

enum Check {
    Type(Vec<String>),
    Properties(HashMap<String, CompiledSchema>),
    AdditionalProperties(AdditionalPolicy),
    Items(ItemsPolicy),
    AdditionalItems(AdditionalPolicy),
    Minimum(f64),
    ExclusiveMinimum,
    Maximum(f64),
    ExclusiveMaximum,
    MinItems(usize),
    MaxItems(usize),
    Pattern(Regex),
    MinLength(usize),
    MaxLength(usize),
    Enum(Vec<JsonValue>),
    DivisibleBy(f64),
    Extends(Vec<CompiledSchema>),
    Format(FormatKind),
    /// Same-repository `$ref` by schema name (spec.md §4.K, §1 Non-goals —
    /// in scope since the Non-goal only excludes resolution beyond a
    /// same-repository name lookup).
    Ref(String),
    /// Carries the keyword's value for the owning Properties check to read
    /// back during default-value propagation; never fails validation on
    /// its own, like `Format`.
    Default(JsonValue),
}

/// Lets a compiled schema resolve a `$ref` by name against the repository
/// that owns it (spec.md §4.K).
pub trait SchemaRepository {
    fn resolve_ref(&self, name: &str, value: &JsonValue) -> bool;
}

/// A compiled schema: a flat list of checks plus the exclusive-bound flags
/// `minimum`/`maximum` read before being applied (spec.md: "checks share a
/// per-property bag used by exclusiveMinimum/exclusiveMaximum").
pub struct CompiledSchema {
    checks: Vec<Check>,
    /// Whether this schema's `required` keyword was truthy — read by the
    /// parent's `Properties` check, since "required" only has meaning when
    /// this schema sits as a named property's value (spec.md §4.K).
    required: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("schema is not a JSON object")]
    NotAnObject,
    #[error("invalid regex in pattern: {0}")]
    BadPattern(#[from] regex::Error),
}

impl CompiledSchema {
    pub fn compile(schema: &JsonValue) -> Result<Self, CompileError> {
        let obj = schema.as_object().ok_or(CompileError::NotAnObject)?;
        let mut checks = Vec::new();
        let mut exclusive_min = false;
        let mut exclusive_max = false;

        if let Some(t) = obj.get("type") {
            let types = match t {
                JsonValue::String(s) => vec![s.clone()],
                JsonValue::Array(items) => items.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
                _ => Vec::new(),
            };
            checks.push(Check::Type(types));
        }

        if let Some(JsonValue::Object(props)) = obj.get("properties") {
            let mut compiled = HashMap::new();
            for (key, sub) in props {
                compiled.insert(key.clone(), CompiledSchema::compile(sub)?);
            }
            checks.push(Check::Properties(compiled));
        }

        if let Some(ap) = obj.get("additionalProperties") {
            checks.push(Check::AdditionalProperties(Self::compile_additional(ap)?));
        }

        if let Some(items) = obj.get("items") {
            let policy = match items {
                JsonValue::Object(_) => ItemsPolicy::Single(Box::new(CompiledSchema::compile(items)?)),
                JsonValue::Array(schemas) => {
                    let mut compiled = Vec::new();
                    for s in schemas {
                        compiled.push(CompiledSchema::compile(s)?);
                    }
                    ItemsPolicy::Tuple(compiled)
                }
                _ => ItemsPolicy::Any,
            };
            checks.push(Check::Items(policy));
        }

        if let Some(ai) = obj.get("additionalItems") {
            checks.push(Check::AdditionalItems(Self::compile_additional(ai)?));
        }

        // Open question resolved (spec.md §9): `required` accepts a bool or
        // the strings "true"/"false"; the latter logs a warning. Only
        // meaningful when this schema is nested as a property value — the
        // parent's `Properties` check reads it back via `self.required`.
        let required = match obj.get("required") {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::String(s)) => {
                tracing::warn!(value = %s, "schema `required` given as a string, expected bool");
                s == "true"
            }
            _ => false,
        };

        if let Some(n) = obj.get("minimum").and_then(JsonValue::as_f64) {
            checks.push(Check::Minimum(n));
        }
        if obj.get("exclusiveMinimum").and_then(JsonValue::as_bool).unwrap_or(false) {
            exclusive_min = true;
        }
        if let Some(n) = obj.get("maximum").and_then(JsonValue::as_f64) {
            checks.push(Check::Maximum(n));
        }
        if obj.get("exclusiveMaximum").and_then(JsonValue::as_bool).unwrap_or(false) {
            exclusive_max = true;
        }
        if exclusive_min {
            checks.push(Check::ExclusiveMinimum);
        }
        if exclusive_max {
            checks.push(Check::ExclusiveMaximum);
        }

        if let Some(n) = obj.get("minItems").and_then(JsonValue::as_u64) {
            checks.push(Check::MinItems(n as usize));
        }
        if let Some(n) = obj.get("maxItems").and_then(JsonValue::as_u64) {
            checks.push(Check::MaxItems(n as usize));
        }
        if let Some(p) = obj.get("pattern").and_then(JsonValue::as_str) {
            checks.push(Check::Pattern(Regex::new(p)?));
        }
        if let Some(n) = obj.get("minLength").and_then(JsonValue::as_u64) {
            checks.push(Check::MinLength(n as usize));
        }
        if let Some(n) = obj.get("maxLength").and_then(JsonValue::as_u64) {
            checks.push(Check::MaxLength(n as usize));
        }
        if let Some(JsonValue::Array(values)) = obj.get("enum") {
            checks.push(Check::Enum(values.clone()));
        }
        if let Some(n) = obj.get("divisibleBy").and_then(JsonValue::as_f64) {
            checks.push(Check::DivisibleBy(n));
        }
        if let Some(JsonValue::Array(subs)) = obj.get("extends") {
            let mut compiled = Vec::new();
            for s in subs {
                compiled.push(CompiledSchema::compile(s)?);
            }
            checks.push(Check::Extends(compiled));
        }
        if let Some(f) = obj.get("format").and_then(JsonValue::as_str) {
            checks.push(Check::Format(FormatKind::parse(f)));
        }
        if let Some(r) = obj.get("$ref").and_then(JsonValue::as_str) {
            checks.push(Check::Ref(r.to_owned()));
        }
        if let Some(d) = obj.get("default") {
            checks.push(Check::Default(d.clone()));
        }

        Ok(CompiledSchema { checks, required })
    }

    fn compile_additional(value: &JsonValue) -> Result<AdditionalPolicy, CompileError> {
        Ok(match value {
            JsonValue::Bool(true) => AdditionalPolicy::Allow,
            JsonValue::Bool(false) => AdditionalPolicy::Deny,
            JsonValue::Object(_) => AdditionalPolicy::Schema(Box::new(CompiledSchema::compile(value)?)),
            _ => AdditionalPolicy::Allow,
        })
    }

    /// Validate with no `$ref` repository available — a `$ref` check is
    /// accepted unresolved. Prefer [`Self::validate_with_repo`] when the
    /// owning [`super::SchemaValidator`] is reachable.
    pub fn validate(&self, value: &JsonValue) -> bool {
        self.validate_with_repo(value, None)
    }

    pub fn validate_with_repo(&self, value: &JsonValue, repo: Option<&dyn SchemaRepository>) -> bool {
        self.checks.iter().all(|check| self.run_check(check, value, repo))
    }

    fn run_check(&self, check: &Check, value: &JsonValue, repo: Option<&dyn SchemaRepository>) -> bool {
        match check {
            Check::Type(types) => types.is_empty() || types.iter().any(|t| value_matches_type(value, t)),
            Check::Properties(props) => {
                let Some(obj) = value.as_object() else { return true };
                props.iter().all(|(key, sub)| {
                    let required = required_literal(sub);
                    match obj.get(key) {
                        Some(v) => sub.validate_with_repo(v, repo),
                        None => !required,
                    }
                })
            }
            Check::AdditionalProperties(policy) => {
                let Some(obj) = value.as_object() else { return true };
                let known = self.known_property_names();
                match policy {
                    AdditionalPolicy::Allow => true,
                    AdditionalPolicy::Deny => obj.keys().all(|k| known.contains(k.as_str())),
                    AdditionalPolicy::Schema(schema) => obj
                        .iter()
                        .filter(|(k, _)| !known.contains(k.as_str()))
                        .all(|(_, v)| schema.validate_with_repo(v, repo)),
                }
            }
            Check::Items(policy) => {
                let Some(items) = value.as_array() else { return true };
                match policy {
                    ItemsPolicy::Any => true,
                    ItemsPolicy::Single(schema) => items.iter().all(|v| schema.validate_with_repo(v, repo)),
                    ItemsPolicy::Tuple(schemas) => {
                        items.iter().zip(schemas.iter()).all(|(v, schema)| schema.validate_with_repo(v, repo))
                    }
                }
            }
            Check::AdditionalItems(policy) => {
                let Some(items) = value.as_array() else { return true };
                let tuple_len = self.items_tuple_len();
                match policy {
                    AdditionalPolicy::Allow => true,
                    AdditionalPolicy::Deny => items.len() <= tuple_len,
                    AdditionalPolicy::Schema(schema) => {
                        items.iter().skip(tuple_len).all(|v| schema.validate_with_repo(v, repo))
                    }
                }
            }
            Check::Minimum(min) => value.as_f64().is_none_or(|n| n >= *min),
            Check::ExclusiveMinimum => value.as_f64().is_none_or(|n| n != self.minimum_value().unwrap_or(f64::MIN)),
            Check::Maximum(max) => value.as_f64().is_none_or(|n| n <= *max),
            Check::ExclusiveMaximum => value.as_f64().is_none_or(|n| n != self.maximum_value().unwrap_or(f64::MAX)),
            Check::MinItems(n) => value.as_array().is_none_or(|a| a.len() >= *n),
            Check::MaxItems(n) => value.as_array().is_none_or(|a| a.len() <= *n),
            Check::Pattern(re) => value.as_str().is_none_or(|s| re.is_match(s)),
            Check::MinLength(n) => value.as_str().is_none_or(|s| s.chars().count() >= *n),
            Check::MaxLength(n) => value.as_str().is_none_or(|s| s.chars().count() <= *n),
            Check::Enum(values) => values.iter().any(|v| v == value),
            Check::DivisibleBy(n) => value.as_f64().is_none_or(|v| *n != 0.0 && (v % n).abs() < f64::EPSILON),
            Check::Extends(subs) => subs.iter().all(|s| s.validate_with_repo(value, repo)),
            Check::Format(_) => true, // accepted but not enforced, per spec.md §4.K
            Check::Ref(name) => match repo {
                Some(repo) => repo.resolve_ref(name, value),
                None => true, // no repository reachable; $ref left unresolved
            },
            Check::Default(_) => true, // read back by apply_defaults, not by validate
        }
    }

    /// Fill in `value`'s missing object properties from their schemas'
    /// `default`, recursively (spec.md §4.K default-value propagation).
    pub fn apply_defaults(&self, value: &JsonValue) -> JsonValue {
        let props = self.checks.iter().find_map(|c| match c {
            Check::Properties(p) => Some(p),
            _ => None,
        });
        let Some(props) = props else { return value.clone() };

        let mut obj = value.as_object().cloned().unwrap_or_default();
        for (key, sub) in props {
            match obj.get(key) {
                Some(existing) => {
                    let filled = sub.apply_defaults(existing);
                    obj.insert(key.clone(), filled);
                }
                None => {
                    if let Some(default) = sub.default_value() {
                        obj.insert(key.clone(), default.clone());
                    }
                }
            }
        }
        JsonValue::Object(obj)
    }

    fn default_value(&self) -> Option<&JsonValue> {
        self.checks.iter().find_map(|c| if let Check::Default(v) = c { Some(v) } else { None })
    }

    fn known_property_names(&self) -> std::collections::HashSet<&str> {
        self.checks
            .iter()
            .find_map(|c| match c {
                Check::Properties(p) => Some(p.keys().map(String::as_str).collect()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn items_tuple_len(&self) -> usize {
        self.checks
            .iter()
            .find_map(|c| match c {
                Check::Items(ItemsPolicy::Tuple(t)) => Some(t.len()),
                _ => None,
            })
            .unwrap_or(0)
    }

    fn minimum_value(&self) -> Option<f64> {
        self.checks.iter().find_map(|c| if let Check::Minimum(n) = c { Some(*n) } else { None })
    }

    fn maximum_value(&self) -> Option<f64> {
        self.checks.iter().find_map(|c| if let Check::Maximum(n) = c { Some(*n) } else { None })
    }

    /// The literal `pattern` a unique-key-indexable property requires, when
    /// this schema is `{type:"string", required:true, pattern:"<literal>"}`.
    pub fn unique_key_literal(&self) -> Option<&str> {
        let is_string_type =
            self.checks.iter().any(|c| matches!(c, Check::Type(t) if t.len() == 1 && t[0] == "string"));
        if !self.required || !is_string_type {
            return None;
        }
        self.checks.iter().find_map(|c| match c {
            Check::Pattern(re) => Some(re.as_str()),
            _ => None,
        })
    }
}

fn required_literal(schema: &CompiledSchema) -> bool {
    schema.required
}

fn value_matches_type(value: &JsonValue, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        "any" => true,
        _ => true,
    }
}
