//! Schema grammar: a closed representation of the JSON Schema subset used by
//! OpenAPI 3.0 / 3.1 contracts.
//!
//! Raw `serde_json::Value` schemas are parsed once into [`Schema`] so that the
//! sampler and the validator can dispatch on [`SchemaKind`] instead of probing
//! keys at every step. `$ref` targets stay symbolic ([`SchemaKind::Ref`]) and
//! are resolved lazily through a [`SchemaRegistry`], which keeps recursive
//! component graphs finite.

use std::collections::BTreeMap;

use serde_json::Value;

/// Reference prefixes understood by [`SchemaRegistry::resolve`].
const REF_PREFIXES: &[&str] = &["#/components/schemas/", "#/definitions/", "#/$defs/"];

/// A parsed schema node: annotations shared by every kind plus the kind itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub meta: SchemaMeta,
    pub kind: SchemaKind,
}

/// Annotations that apply regardless of the node's kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaMeta {
    /// `example` (or the first entry of `examples`)
    pub example: Option<Value>,
    pub default: Option<Value>,
    /// `enum`, or a single-element list built from `const`
    pub enum_values: Vec<Value>,
    /// OpenAPI 3.0 `nullable: true`, or `"null"` inside a 3.1 type array
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    /// No type constraint (`{}` or `true`)
    Any,
    Null,
    Boolean,
    Integer(NumericRules),
    Number(NumericRules),
    String(StringRules),
    Array(ArrayRules),
    Object(ObjectRules),
    Composition(Composition),
    /// Unresolved `$ref`, looked up through [`SchemaRegistry`]
    Ref(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumericRules {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<f64>,
    pub exclusive_maximum: Option<f64>,
    pub multiple_of: Option<f64>,
}

impl NumericRules {
    /// Smallest integer admitted by the lower bounds, if any.
    #[must_use]
    pub fn integer_lower(&self) -> Option<i64> {
        let inclusive = self.minimum.map(|m| m.ceil() as i64);
        let exclusive = self.exclusive_minimum.map(|m| (m.floor() as i64).saturating_add(1));
        match (inclusive, exclusive) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Largest integer admitted by the upper bounds, if any.
    #[must_use]
    pub fn integer_upper(&self) -> Option<i64> {
        let inclusive = self.maximum.map(|m| m.floor() as i64);
        let exclusive = self.exclusive_maximum.map(|m| (m.ceil() as i64).saturating_sub(1));
        match (inclusive, exclusive) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringRules {
    pub format: Option<String>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayRules {
    pub items: Option<Box<Schema>>,
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectRules {
    /// Declared properties, in document order
    pub properties: Vec<(String, Schema)>,
    pub required: Vec<String>,
    pub additional: AdditionalProperties,
}

impl ObjectRules {
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Schema> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, schema)| schema)
    }

    #[must_use]
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

/// What an object says about properties it does not declare.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AdditionalProperties {
    #[default]
    Allowed,
    Forbidden,
    Schema(Box<Schema>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionMode {
    OneOf,
    AnyOf,
    AllOf,
}

impl CompositionMode {
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::OneOf => "oneOf",
            Self::AnyOf => "anyOf",
            Self::AllOf => "allOf",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub mode: CompositionMode,
    pub branches: Vec<Schema>,
}

impl Schema {
    /// A schema with no constraints at all.
    #[must_use]
    pub fn any() -> Self {
        Self {
            meta: SchemaMeta::default(),
            kind: SchemaKind::Any,
        }
    }

    #[must_use]
    pub fn of_kind(kind: SchemaKind) -> Self {
        Self {
            meta: SchemaMeta::default(),
            kind,
        }
    }

    /// Parse a raw JSON Schema node.
    ///
    /// The contract is assumed to be structurally valid; keywords with
    /// unexpected shapes are ignored rather than reported.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            // Boolean schemas and anything else degrade to "no constraint".
            return Self::any();
        };

        let mut meta = SchemaMeta {
            example: obj.get("example").cloned().or_else(|| {
                obj.get("examples")
                    .and_then(|v| v.as_array())
                    .and_then(|arr| arr.first())
                    .cloned()
            }),
            default: obj.get("default").cloned(),
            enum_values: obj
                .get("enum")
                .and_then(|v| v.as_array())
                .cloned()
                .or_else(|| obj.get("const").map(|c| vec![c.clone()]))
                .unwrap_or_default(),
            nullable: obj
                .get("nullable")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        };

        // $ref wins over sibling keywords (OpenAPI 3.0 semantics).
        if let Some(reference) = obj.get("$ref").and_then(|v| v.as_str()) {
            return Self {
                meta,
                kind: SchemaKind::Ref(reference.to_string()),
            };
        }

        for mode in [
            CompositionMode::AllOf,
            CompositionMode::OneOf,
            CompositionMode::AnyOf,
        ] {
            if let Some(branches) = obj.get(mode.keyword()).and_then(|v| v.as_array()) {
                return Self {
                    meta,
                    kind: SchemaKind::Composition(Composition {
                        mode,
                        branches: branches.iter().map(Self::from_value).collect(),
                    }),
                };
            }
        }

        let type_name = match obj.get("type") {
            Some(Value::String(name)) => Some(name.as_str()),
            Some(Value::Array(names)) => {
                let names: Vec<&str> = names.iter().filter_map(|n| n.as_str()).collect();
                if names.contains(&"null") {
                    meta.nullable = true;
                }
                names
                    .iter()
                    .copied()
                    .find(|n| *n != "null")
                    .or_else(|| names.first().copied())
            }
            _ => None,
        };

        let kind = match type_name {
            Some("null") => SchemaKind::Null,
            Some("boolean") => SchemaKind::Boolean,
            Some("integer") => SchemaKind::Integer(numeric_rules(obj)),
            Some("number") => SchemaKind::Number(numeric_rules(obj)),
            Some("string") => SchemaKind::String(string_rules(obj)),
            Some("array") => SchemaKind::Array(array_rules(obj)),
            Some("object") => SchemaKind::Object(object_rules(obj)),
            Some(_) => SchemaKind::Any,
            None => {
                // Infer from structure
                if obj.contains_key("properties")
                    || obj.contains_key("required")
                    || obj.contains_key("additionalProperties")
                {
                    SchemaKind::Object(object_rules(obj))
                } else if obj.contains_key("items") {
                    SchemaKind::Array(array_rules(obj))
                } else {
                    SchemaKind::Any
                }
            }
        };

        Self { meta, kind }
    }
}

impl From<&Value> for Schema {
    fn from(value: &Value) -> Self {
        Self::from_value(value)
    }
}

type RawObject = serde_json::Map<String, Value>;

fn numeric_rules(obj: &RawObject) -> NumericRules {
    let number = |key: &str| obj.get(key).and_then(|v| v.as_f64());
    let mut rules = NumericRules {
        minimum: number("minimum"),
        maximum: number("maximum"),
        exclusive_minimum: number("exclusiveMinimum"),
        exclusive_maximum: number("exclusiveMaximum"),
        multiple_of: number("multipleOf").filter(|m| *m > 0.0),
    };
    // OpenAPI 3.0: boolean exclusive flags turn the plain bound exclusive.
    if obj.get("exclusiveMinimum").and_then(|v| v.as_bool()) == Some(true) {
        rules.exclusive_minimum = rules.minimum.take();
    }
    if obj.get("exclusiveMaximum").and_then(|v| v.as_bool()) == Some(true) {
        rules.exclusive_maximum = rules.maximum.take();
    }
    rules
}

fn string_rules(obj: &RawObject) -> StringRules {
    StringRules {
        format: obj
            .get("format")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        min_length: obj.get("minLength").and_then(|v| v.as_u64()),
        max_length: obj.get("maxLength").and_then(|v| v.as_u64()),
    }
}

fn array_rules(obj: &RawObject) -> ArrayRules {
    ArrayRules {
        items: obj
            .get("items")
            .filter(|v| v.is_object())
            .map(|v| Box::new(Schema::from_value(v))),
        min_items: obj.get("minItems").and_then(|v| v.as_u64()),
        max_items: obj.get("maxItems").and_then(|v| v.as_u64()),
    }
}

fn object_rules(obj: &RawObject) -> ObjectRules {
    let properties = obj
        .get("properties")
        .and_then(|v| v.as_object())
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| (name.clone(), Schema::from_value(schema)))
                .collect()
        })
        .unwrap_or_default();

    let required = obj
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let additional = match obj.get("additionalProperties") {
        Some(Value::Bool(false)) => AdditionalProperties::Forbidden,
        Some(schema @ Value::Object(_)) => {
            AdditionalProperties::Schema(Box::new(Schema::from_value(schema)))
        }
        _ => AdditionalProperties::Allowed,
    };

    ObjectRules {
        properties,
        required,
        additional,
    }
}

/// Named component schemas, the target space for `$ref`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Schema>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a `components.schemas`-shaped object.
    #[must_use]
    pub fn from_components(components: &Value) -> Self {
        let schemas = components
            .as_object()
            .map(|obj| {
                obj.iter()
                    .map(|(name, raw)| (name.clone(), Schema::from_value(raw)))
                    .collect()
            })
            .unwrap_or_default();
        Self { schemas }
    }

    pub fn insert(&mut self, name: impl Into<String>, schema: Schema) {
        self.schemas.insert(name.into(), schema);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.insert(name, schema);
        self
    }

    /// Resolve a local reference such as `#/components/schemas/User`.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Option<&Schema> {
        REF_PREFIXES
            .iter()
            .find_map(|prefix| reference.strip_prefix(prefix))
            .and_then(|name| self.schemas.get(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_integer_bounds() {
        let schema = Schema::from_value(&json!({"type": "integer", "minimum": 1, "maximum": 10}));
        let SchemaKind::Integer(rules) = schema.kind else {
            panic!("expected integer");
        };
        assert_eq!(rules.integer_lower(), Some(1));
        assert_eq!(rules.integer_upper(), Some(10));
    }

    #[test]
    fn huge_exclusive_bounds_saturate() {
        let schema = Schema::from_value(&json!({
            "type": "integer",
            "exclusiveMinimum": 1e19,
            "exclusiveMaximum": -1e19
        }));
        let SchemaKind::Integer(rules) = schema.kind else {
            panic!("expected integer");
        };
        assert_eq!(rules.integer_lower(), Some(i64::MAX));
        assert_eq!(rules.integer_upper(), Some(i64::MIN));
    }

    #[test]
    fn openapi30_exclusive_flags_move_bounds() {
        let schema = Schema::from_value(&json!({
            "type": "integer",
            "minimum": 0,
            "exclusiveMinimum": true,
            "maximum": 10,
            "exclusiveMaximum": true
        }));
        let SchemaKind::Integer(rules) = schema.kind else {
            panic!("expected integer");
        };
        assert_eq!(rules.minimum, None);
        assert_eq!(rules.exclusive_minimum, Some(0.0));
        assert_eq!(rules.integer_lower(), Some(1));
        assert_eq!(rules.integer_upper(), Some(9));
    }

    #[test]
    fn type_array_with_null_is_nullable() {
        let schema = Schema::from_value(&json!({"type": ["string", "null"]}));
        assert!(schema.meta.nullable);
        assert!(matches!(schema.kind, SchemaKind::String(_)));
    }

    #[test]
    fn nullable_flag_is_read() {
        let schema = Schema::from_value(&json!({"type": "integer", "nullable": true}));
        assert!(schema.meta.nullable);
    }

    #[test]
    fn infers_object_from_properties() {
        let schema = Schema::from_value(&json!({
            "properties": {"id": {"type": "integer"}},
            "required": ["id"],
            "additionalProperties": false
        }));
        let SchemaKind::Object(rules) = schema.kind else {
            panic!("expected object");
        };
        assert!(rules.is_required("id"));
        assert!(rules.property("id").is_some());
        assert_eq!(rules.additional, AdditionalProperties::Forbidden);
    }

    #[test]
    fn infers_array_from_items() {
        let schema = Schema::from_value(&json!({"items": {"type": "string"}, "maxItems": 3}));
        let SchemaKind::Array(rules) = schema.kind else {
            panic!("expected array");
        };
        assert_eq!(rules.max_items, Some(3));
        assert!(rules.items.is_some());
    }

    #[test]
    fn const_becomes_single_enum_value() {
        let schema = Schema::from_value(&json!({"const": "fixed"}));
        assert_eq!(schema.meta.enum_values, vec![json!("fixed")]);
    }

    #[test]
    fn ref_takes_precedence_over_siblings() {
        let schema = Schema::from_value(&json!({
            "$ref": "#/components/schemas/User",
            "type": "string"
        }));
        assert_eq!(
            schema.kind,
            SchemaKind::Ref("#/components/schemas/User".into())
        );
    }

    #[test]
    fn composition_is_detected() {
        let schema = Schema::from_value(&json!({
            "oneOf": [{"type": "string"}, {"type": "integer"}]
        }));
        let SchemaKind::Composition(comp) = schema.kind else {
            panic!("expected composition");
        };
        assert_eq!(comp.mode, CompositionMode::OneOf);
        assert_eq!(comp.branches.len(), 2);
    }

    #[test]
    fn registry_resolves_component_refs() {
        let registry = SchemaRegistry::from_components(&json!({
            "User": {"type": "object", "properties": {"id": {"type": "integer"}}}
        }));
        assert!(registry.resolve("#/components/schemas/User").is_some());
        assert!(registry.resolve("#/components/schemas/Missing").is_none());
        assert!(registry.resolve("User").is_none());
    }

    #[test]
    fn non_object_schema_is_any() {
        assert_eq!(Schema::from_value(&json!(true)).kind, SchemaKind::Any);
    }
}
