//! OpenAPI document → operation descriptors + schema registry
//!
//! Accepts OpenAPI 3.0 / 3.1 documents as JSON or YAML. The document is assumed
//! to be structurally valid; parts that cannot be interpreted are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::model::{OperationDescriptor, ParamSpec, RequestBodySpec, ResponseSpec};
use crate::schema::{Schema, SchemaRegistry};

const METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Hops followed when a `$ref` points at another `$ref`.
const MAX_REF_HOPS: u32 = 8;

const JSON_MEDIA: &str = "application/json";

/// A parsed API contract.
#[derive(Debug, Clone, Default)]
pub struct Contract {
    pub operations: Vec<OperationDescriptor>,
    pub schemas: SchemaRegistry,
}

impl Contract {
    /// Read and parse a contract file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or declares no
    /// operations
    pub fn load(path: &Path) -> Result<Self, ContractError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ContractError::Io(path.to_path_buf(), e.to_string()))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(DocumentFormat::from_extension)
            .unwrap_or(DocumentFormat::Sniff);
        Self::parse(&content, format)
    }

    /// Parse contract text.
    ///
    /// # Errors
    ///
    /// Returns error on malformed text, or when no operations are declared
    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, ContractError> {
        let document = parse_document(content, format)?;
        Self::from_document(&document)
    }

    /// Build from an already-parsed document.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::NoOperations`] when `paths` yields nothing
    pub fn from_document(document: &Value) -> Result<Self, ContractError> {
        let mut schemas = SchemaRegistry::from_components(
            document
                .pointer("/components/schemas")
                .unwrap_or(&Value::Null),
        );
        if let Some(definitions) = document.get("definitions").and_then(Value::as_object) {
            for (name, raw) in definitions {
                schemas.insert(name.clone(), Schema::from_value(raw));
            }
        }

        let operations = extract_operations(document);
        if operations.is_empty() {
            return Err(ContractError::NoOperations);
        }
        tracing::debug!(
            operations = operations.len(),
            schemas = schemas.len(),
            "contract loaded"
        );
        Ok(Self {
            operations,
            schemas,
        })
    }

    /// Look up an operation by method and path template.
    #[must_use]
    pub fn operation(&self, method: &str, path_template: &str) -> Option<&OperationDescriptor> {
        self.operations.iter().find(|op| {
            op.method.eq_ignore_ascii_case(method) && op.path_template == path_template
        })
    }
}

/// How to read contract text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    /// JSON if the text starts with `{`, YAML otherwise
    Sniff,
}

impl DocumentFormat {
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            _ => Self::Sniff,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("Cannot read {0}: {1}")]
    Io(PathBuf, String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Contract declares no operations")]
    NoOperations,
}

fn parse_document(content: &str, format: DocumentFormat) -> Result<Value, ContractError> {
    let format = match format {
        DocumentFormat::Sniff if content.trim_start().starts_with('{') => DocumentFormat::Json,
        DocumentFormat::Sniff => DocumentFormat::Yaml,
        other => other,
    };
    match format {
        DocumentFormat::Json => serde_json::from_str(content)
            .map_err(|e| ContractError::Parse(format!("Invalid JSON: {e}"))),
        _ => serde_yml::from_str(content)
            .map_err(|e| ContractError::Parse(format!("Invalid YAML: {e}"))),
    }
}

fn extract_operations(document: &Value) -> Vec<OperationDescriptor> {
    let mut ops = Vec::new();
    let Some(paths) = document.get("paths").and_then(Value::as_object) else {
        return ops;
    };

    for (path, path_item) in paths {
        let path_item = follow(document, path_item);
        for method in METHODS {
            let Some(operation) = path_item.get(*method) else {
                continue;
            };
            let mut op = OperationDescriptor::new(method, path);
            op.operation_id = operation
                .get("operationId")
                .and_then(Value::as_str)
                .map(str::to_string);

            // Path-level first; operation-level overrides same name + location
            let mut params: Vec<(String, ParamSpec)> = Vec::new();
            for source in [path_item.get("parameters"), operation.get("parameters")]
                .into_iter()
                .flatten()
                .filter_map(Value::as_array)
            {
                for raw in source {
                    if let Some((location, spec)) = parse_parameter(follow(document, raw)) {
                        params.retain(|(loc, p)| !(loc == &location && p.name == spec.name));
                        params.push((location, spec));
                    }
                }
            }
            for (location, spec) in params {
                match location.as_str() {
                    "path" => op.path_params.push(spec),
                    "query" => op.query_params.push(spec),
                    "header" => op.header_params.push(spec),
                    _ => {}
                }
            }

            op.request_body = operation
                .get("requestBody")
                .map(|raw| follow(document, raw))
                .and_then(parse_request_body);

            if let Some(responses) = operation.get("responses").and_then(Value::as_object) {
                op.responses = responses
                    .iter()
                    .map(|(pattern, raw)| (pattern.clone(), parse_response(follow(document, raw))))
                    .collect();
            }

            ops.push(op);
        }
    }

    ops
}

/// Follow a non-schema `$ref` (parameters, request bodies, responses) to
/// its target. Unresolvable refs yield the original node.
fn follow<'a>(document: &'a Value, node: &'a Value) -> &'a Value {
    let mut current = node;
    for _ in 0..MAX_REF_HOPS {
        let Some(target) = current
            .get("$ref")
            .and_then(Value::as_str)
            .and_then(|r| r.strip_prefix('#'))
            .and_then(|pointer| document.pointer(pointer))
        else {
            break;
        };
        current = target;
    }
    current
}

fn parse_parameter(raw: &Value) -> Option<(String, ParamSpec)> {
    let name = raw.get("name")?.as_str()?;
    let location = raw.get("in")?.as_str()?.to_string();
    let mut schema = raw
        .get("schema")
        .map(Schema::from_value)
        .unwrap_or_else(|| Schema::from_value(&serde_json::json!({"type": "string"})));
    if schema.meta.example.is_none() {
        schema.meta.example = raw.get("example").cloned();
    }
    // Path parameters are always required
    let required = location == "path"
        || raw
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(false);

    let mut spec = ParamSpec::new(name, schema);
    spec.required = required;
    Some((location, spec))
}

fn parse_request_body(raw: &Value) -> Option<RequestBodySpec> {
    let content = raw.get("content")?.as_object()?;
    let (content_type, media) = content
        .get_key_value(JSON_MEDIA)
        .or_else(|| content.iter().find(|(k, _)| k.ends_with("+json")))
        .or_else(|| content.iter().next())?;

    let example = media.get("example").cloned().or_else(|| {
        media
            .get("examples")
            .and_then(Value::as_object)
            .and_then(|examples| examples.values().find_map(|ex| ex.get("value").cloned()))
    });

    Some(RequestBodySpec {
        content_type: content_type.clone(),
        schema: media.get("schema").map(Schema::from_value),
        example,
    })
}

fn parse_response(raw: &Value) -> ResponseSpec {
    let content: BTreeMap<String, Option<Schema>> = raw
        .get("content")
        .and_then(Value::as_object)
        .map(|content| {
            content
                .iter()
                .map(|(media, body)| (media.clone(), body.get("schema").map(Schema::from_value)))
                .collect()
        })
        .unwrap_or_default();
    ResponseSpec { content }
}
