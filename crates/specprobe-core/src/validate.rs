//! Response validation against declared responses
//!
//! Three checks, all collected rather than short-circuited:
//! status membership, Content-Type conformance, and recursive body-schema
//! conformance. No I/O; every violation becomes a line in
//! [`ValidationReport::schema_errors`].

use serde_json::Value;

use crate::model::{Attempt, OperationDescriptor, ResponseData, ValidationReport};
use crate::schema::{
    AdditionalProperties, ArrayRules, Composition, CompositionMode, NumericRules, ObjectRules,
    Schema, SchemaKind, SchemaRegistry, StringRules,
};

/// Default nesting depth for body validation; deeper values are accepted
/// unchecked.
const DEFAULT_MAX_DEPTH: u32 = 64;

/// Tolerance for `multipleOf` on floating-point values.
const MULTIPLE_OF_EPSILON: f64 = 1e-9;

/// Checks responses against the operations of one contract.
#[derive(Debug, Clone)]
pub struct ResponseValidator<'a> {
    registry: &'a SchemaRegistry,
    max_depth: u32,
}

impl<'a> ResponseValidator<'a> {
    #[must_use]
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self {
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Validate the attempt's response. `None` when the attempt never reached
    /// the server (nothing to validate).
    #[must_use]
    pub fn validate_attempt(
        &self,
        attempt: &Attempt,
        operation: &OperationDescriptor,
    ) -> Option<ValidationReport> {
        attempt
            .response()
            .map(|response| self.validate(response, operation))
    }

    /// Validate one response.
    ///
    /// - No responses declared → pass (nothing to check against)
    /// - Status lookup: exact → range (`2XX`) → `default` → invalid
    /// - Content declared → Content-Type must match one declared media type
    /// - JSON media type with schema → body must conform
    #[must_use]
    pub fn validate(&self, response: &ResponseData, operation: &OperationDescriptor) -> ValidationReport {
        let mut report = ValidationReport::passing();
        if operation.responses.is_empty() {
            return report;
        }

        let status = response.status;
        let Some((_, declared)) = operation.match_response(status) else {
            report.status_valid = false;
            let patterns: Vec<&str> = operation.responses.keys().map(String::as_str).collect();
            report.schema_errors.push(format!(
                "status {status} is not declared (declared: {})",
                patterns.join(", ")
            ));
            return report;
        };

        if declared.content.is_empty() {
            return report;
        }

        let declared_types: Vec<&str> = declared.content.keys().map(String::as_str).collect();
        let Some(actual) = response.content_type().map(media_essence) else {
            report.content_type_valid = false;
            report.schema_errors.push(format!(
                "missing Content-Type header, expected one of [{}]",
                declared_types.join(", ")
            ));
            return report;
        };

        let matched = declared
            .content
            .iter()
            .find(|(media, _)| media_matches(media, &actual));
        let Some((media, schema)) = matched else {
            report.content_type_valid = false;
            report.schema_errors.push(format!(
                "content type \"{actual}\" does not match declared [{}]",
                declared_types.join(", ")
            ));
            return report;
        };

        if let Some(schema) = schema {
            if is_json_media(media) || is_json_media(&actual) {
                self.check_body(&response.body, schema, &mut report.schema_errors);
            }
        }

        report
    }

    fn check_body(&self, body: &str, schema: &Schema, errors: &mut Vec<String>) {
        if body.trim().is_empty() {
            errors.push("$: response body is empty".to_string());
            return;
        }
        match serde_json::from_str::<Value>(body) {
            Ok(value) => self.check_value(schema, &value, "$", errors),
            Err(e) => errors.push(format!("$: response body is not valid JSON: {e}")),
        }
    }

    /// Validate an already-parsed value, collecting every violation.
    pub fn check_value(&self, schema: &Schema, value: &Value, path: &str, errors: &mut Vec<String>) {
        self.check(schema, value, path, 0, errors);
    }

    fn check(&self, schema: &Schema, value: &Value, path: &str, depth: u32, errors: &mut Vec<String>) {
        if depth > self.max_depth {
            return;
        }
        if value.is_null() && schema.meta.nullable {
            return;
        }

        if !schema.meta.enum_values.is_empty() && !schema.meta.enum_values.contains(value) {
            let allowed: Vec<String> = schema.meta.enum_values.iter().map(Value::to_string).collect();
            errors.push(format!("{path}: {value} is not one of [{}]", allowed.join(", ")));
        }

        match &schema.kind {
            SchemaKind::Any => {}
            SchemaKind::Null => {
                if !value.is_null() {
                    errors.push(type_error(path, "null", value));
                }
            }
            SchemaKind::Boolean => {
                if !value.is_boolean() {
                    errors.push(type_error(path, "boolean", value));
                }
            }
            SchemaKind::Integer(rules) => match value.as_f64() {
                Some(n) if is_integral(value) => check_range(rules, n, value, path, errors),
                _ => errors.push(type_error(path, "integer", value)),
            },
            SchemaKind::Number(rules) => match value.as_f64() {
                Some(n) => check_range(rules, n, value, path, errors),
                None => errors.push(type_error(path, "number", value)),
            },
            SchemaKind::String(rules) => match value.as_str() {
                Some(s) => check_string(rules, s, path, errors),
                None => errors.push(type_error(path, "string", value)),
            },
            SchemaKind::Array(rules) => self.check_array(rules, value, path, depth, errors),
            SchemaKind::Object(rules) => self.check_object(rules, value, path, depth, errors),
            SchemaKind::Composition(comp) => self.check_composition(comp, value, path, depth, errors),
            SchemaKind::Ref(reference) => match self.registry.resolve(reference) {
                Some(target) => self.check(target, value, path, depth + 1, errors),
                None => tracing::debug!(%reference, %path, "unresolvable $ref, value not checked"),
            },
        }
    }

    fn check_array(
        &self,
        rules: &ArrayRules,
        value: &Value,
        path: &str,
        depth: u32,
        errors: &mut Vec<String>,
    ) {
        let Some(items) = value.as_array() else {
            errors.push(type_error(path, "array", value));
            return;
        };
        let len = items.len() as u64;
        if let Some(min) = rules.min_items.filter(|min| len < *min) {
            errors.push(format!("{path}: {len} items, expected at least {min}"));
        }
        if let Some(max) = rules.max_items.filter(|max| len > *max) {
            errors.push(format!("{path}: {len} items, expected at most {max}"));
        }
        if let Some(item_schema) = &rules.items {
            for (i, item) in items.iter().enumerate() {
                self.check(item_schema, item, &format!("{path}[{i}]"), depth + 1, errors);
            }
        }
    }

    fn check_object(
        &self,
        rules: &ObjectRules,
        value: &Value,
        path: &str,
        depth: u32,
        errors: &mut Vec<String>,
    ) {
        let Some(obj) = value.as_object() else {
            errors.push(type_error(path, "object", value));
            return;
        };

        for name in &rules.required {
            if !obj.contains_key(name) {
                errors.push(format!("{path}: missing required property \"{name}\""));
            }
        }

        for (name, member) in obj {
            let member_path = format!("{path}.{name}");
            match rules.property(name) {
                Some(prop_schema) => self.check(prop_schema, member, &member_path, depth + 1, errors),
                None => match &rules.additional {
                    AdditionalProperties::Allowed => {}
                    AdditionalProperties::Forbidden => {
                        errors.push(format!("{path}: unexpected property \"{name}\""));
                    }
                    AdditionalProperties::Schema(extra) => {
                        self.check(extra, member, &member_path, depth + 1, errors);
                    }
                },
            }
        }
    }

    fn check_composition(
        &self,
        comp: &Composition,
        value: &Value,
        path: &str,
        depth: u32,
        errors: &mut Vec<String>,
    ) {
        let branch_errors: Vec<Vec<String>> = comp
            .branches
            .iter()
            .map(|branch| {
                let mut found = Vec::new();
                self.check(branch, value, path, depth + 1, &mut found);
                found
            })
            .collect();
        let matching = branch_errors.iter().filter(|e| e.is_empty()).count();

        match comp.mode {
            CompositionMode::AllOf => errors.extend(branch_errors.into_iter().flatten()),
            CompositionMode::AnyOf if matching == 0 && !comp.branches.is_empty() => {
                errors.push(format!(
                    "{path}: matches none of the {} anyOf branches",
                    comp.branches.len()
                ));
            }
            CompositionMode::OneOf if matching != 1 && !comp.branches.is_empty() => {
                errors.push(format!(
                    "{path}: matches {matching} oneOf branches, expected exactly one"
                ));
            }
            CompositionMode::AnyOf | CompositionMode::OneOf => {}
        }
    }
}

fn type_error(path: &str, expected: &str, value: &Value) -> String {
    format!("{path}: expected {expected}, found {}", json_type_name(value))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_integral(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => false,
    }
}

fn check_range(rules: &NumericRules, n: f64, value: &Value, path: &str, errors: &mut Vec<String>) {
    if let Some(min) = rules.minimum.filter(|min| n < *min) {
        errors.push(format!("{path}: {value} is less than minimum {min}"));
    }
    if let Some(max) = rules.maximum.filter(|max| n > *max) {
        errors.push(format!("{path}: {value} is greater than maximum {max}"));
    }
    if let Some(min) = rules.exclusive_minimum.filter(|min| n <= *min) {
        errors.push(format!("{path}: {value} is not greater than exclusive minimum {min}"));
    }
    if let Some(max) = rules.exclusive_maximum.filter(|max| n >= *max) {
        errors.push(format!("{path}: {value} is not less than exclusive maximum {max}"));
    }
    if let Some(step) = rules.multiple_of {
        let ratio = n / step;
        if (ratio - ratio.round()).abs() > MULTIPLE_OF_EPSILON {
            errors.push(format!("{path}: {value} is not a multiple of {step}"));
        }
    }
}

fn check_string(rules: &StringRules, s: &str, path: &str, errors: &mut Vec<String>) {
    let len = s.chars().count() as u64;
    if let Some(min) = rules.min_length.filter(|min| len < *min) {
        errors.push(format!("{path}: length {len} is shorter than minLength {min}"));
    }
    if let Some(max) = rules.max_length.filter(|max| len > *max) {
        errors.push(format!("{path}: length {len} is longer than maxLength {max}"));
    }
    if let Some(format) = rules.format.as_deref() {
        if !matches_format(format, s) {
            errors.push(format!("{path}: \"{s}\" is not a valid {format}"));
        }
    }
}

/// Unknown formats always match.
fn matches_format(format: &str, s: &str) -> bool {
    match format {
        "email" => s
            .split_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@')
                    && !s.chars().any(char::is_whitespace)
            }),
        "uri" | "url" => has_uri_scheme(s),
        "date" => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        "date-time" => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        "uuid" => uuid::Uuid::parse_str(s).is_ok(),
        _ => true,
    }
}

/// RFC 3986 scheme: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"
fn has_uri_scheme(s: &str) -> bool {
    let Some((scheme, rest)) = s.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
        && !s.chars().any(char::is_whitespace)
}

/// `"Application/JSON; charset=utf-8"` → `"application/json"`
#[must_use]
pub fn media_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Declared media ranges may use `*` wildcards (`application/*`, `*/*`).
fn media_matches(declared: &str, actual: &str) -> bool {
    let declared = media_essence(declared);
    if declared == actual || declared == "*/*" {
        return true;
    }
    match (declared.split_once('/'), actual.split_once('/')) {
        (Some((d_type, "*")), Some((a_type, _))) => d_type == a_type,
        _ => false,
    }
}

fn is_json_media(media: &str) -> bool {
    let essence = media_essence(media);
    essence == "application/json" || essence.ends_with("+json")
}
