//! Operation → execution plan
//!
//! Builds a concrete URL, header set and body for each operation. Order of
//! header application: sampled header parameters, `content-type` for bodied
//! requests, caller headers, then decorators (auth). Later steps win on a
//! case-insensitive name collision.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Url;
use serde_json::Value;

use specprobe_core::sampler::PLACEHOLDER;
use specprobe_core::validate::media_essence;
use specprobe_core::{
    ConfigError, ExecutionPlan, OperationDescriptor, PlanDecorator, RequestBodySpec, SchemaSampler,
};

/// Header parameters that OpenAPI says are controlled elsewhere.
const RESERVED_HEADERS: &[&str] = &["accept", "content-type", "authorization"];

const JSON_MEDIA: &str = "application/json";

/// Plans requests for one contract against one base URL.
#[derive(Clone)]
pub struct RequestPlanner<'a> {
    base: Url,
    sampler: SchemaSampler<'a>,
    headers: BTreeMap<String, String>,
    path_values: BTreeMap<String, String>,
    decorators: Vec<Arc<dyn PlanDecorator>>,
}

impl<'a> RequestPlanner<'a> {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `base_url` is not an absolute
    /// http(s) URL
    pub fn new(base_url: &str, sampler: SchemaSampler<'a>) -> Result<Self, ConfigError> {
        let base = Url::parse(base_url)
            .map_err(|e| ConfigError::Invalid(format!("base URL {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "base URL {base_url:?} must be an absolute http(s) URL"
            )));
        }
        Ok(Self {
            base,
            sampler,
            headers: BTreeMap::new(),
            path_values: BTreeMap::new(),
            decorators: Vec::new(),
        })
    }

    /// Headers added to every plan, after generated ones.
    #[must_use]
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Fixed values for path tokens, used instead of sampling.
    #[must_use]
    pub fn with_path_values(mut self, values: BTreeMap<String, String>) -> Self {
        self.path_values = values;
        self
    }

    /// Runs last on every plan, in registration order.
    #[must_use]
    pub fn with_decorator(mut self, decorator: Arc<dyn PlanDecorator>) -> Self {
        self.decorators.push(decorator);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// One plan per operation; `index` is the position in `operations`.
    #[must_use]
    pub fn plan_all(&self, operations: &[OperationDescriptor]) -> Vec<ExecutionPlan> {
        operations
            .iter()
            .enumerate()
            .map(|(index, op)| self.plan(index, op))
            .collect()
    }

    #[must_use]
    pub fn plan(&self, index: usize, op: &OperationDescriptor) -> ExecutionPlan {
        let url = self.build_url(op);

        let mut plan = ExecutionPlan {
            index,
            method: op.method.clone(),
            endpoint: op.path_template.clone(),
            url: url.to_string(),
            headers: BTreeMap::new(),
            body: None,
        };

        for param in &op.header_params {
            if RESERVED_HEADERS.contains(&param.name.to_ascii_lowercase().as_str()) {
                continue;
            }
            if let Some(value) = render_literal(&self.sampler.sample(&param.schema)) {
                plan.set_header(&param.name, value);
            }
        }

        if op.carries_body() {
            if let Some((content_type, bytes)) = op.request_body.as_ref().and_then(|rb| self.body(rb)) {
                plan.set_header("content-type", content_type);
                plan.body = Some(bytes);
            }
        }

        for (name, value) in &self.headers {
            plan.set_header(name, value.clone());
        }
        for decorator in &self.decorators {
            decorator.decorate(&mut plan);
        }

        tracing::debug!(index, label = %op.label(), url = %plan.url, "planned");
        plan
    }

    fn build_url(&self, op: &OperationDescriptor) -> Url {
        let mut url = self.base.clone();

        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            for segment in op.path_template.split('/').filter(|s| !s.is_empty()) {
                segments.push(&self.render_segment(segment, op));
            }
            if op.path_template.len() > 1 && op.path_template.ends_with('/') {
                segments.push("");
            }
        }

        let pairs: Vec<(&str, String)> = op
            .query_params
            .iter()
            .filter(|param| !consumed_by_path(op, &param.name))
            .flat_map(|param| {
                query_values(&self.sampler.sample(&param.schema))
                    .into_iter()
                    .map(move |value| (param.name.as_str(), value))
            })
            .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        url
    }

    /// Replace every `{name}` token in one path segment.
    fn render_segment(&self, segment: &str, op: &OperationDescriptor) -> String {
        let mut out = String::new();
        let mut rest = segment;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|i| open + i) else {
                break;
            };
            out.push_str(&rest[..open]);
            out.push_str(&self.path_value(&rest[open + 1..close], op));
            rest = &rest[close + 1..];
        }
        out.push_str(rest);

        if out.is_empty() {
            PLACEHOLDER.to_string()
        } else {
            out
        }
    }

    fn path_value(&self, name: &str, op: &OperationDescriptor) -> String {
        if let Some(fixed) = self.path_values.get(name).filter(|v| !v.is_empty()) {
            return fixed.clone();
        }
        op.path_params
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| render_literal(&self.sampler.sample(&p.schema)))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| PLACEHOLDER.to_string())
    }

    /// Explicit example wins; otherwise sample the schema.
    fn body(&self, spec: &RequestBodySpec) -> Option<(String, Vec<u8>)> {
        let value = spec
            .example
            .clone()
            .or_else(|| spec.schema.as_ref().map(|s| self.sampler.sample(s)))?;

        let essence = media_essence(&spec.content_type);
        if essence == JSON_MEDIA || essence.ends_with("+json") {
            Some((spec.content_type.clone(), value.to_string().into_bytes()))
        } else if essence.starts_with("text/") {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((spec.content_type.clone(), text.into_bytes()))
        } else {
            Some((JSON_MEDIA.to_string(), value.to_string().into_bytes()))
        }
    }
}

/// Scalar → text for paths and headers; `None` for null. Arrays use the
/// comma-joined simple style.
fn render_literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) | Value::Object(_) => Some(value.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(render_literal)
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

/// A parameter whose name is already rendered into the path.
fn consumed_by_path(op: &OperationDescriptor, name: &str) -> bool {
    op.path_params.iter().any(|p| p.name == name)
        || path_tokens(&op.path_template).any(|token| token == name)
}

/// `{name}` tokens of a path template, in order.
fn path_tokens(template: &str) -> impl Iterator<Item = &str> {
    template
        .split('{')
        .skip(1)
        .filter_map(|part| part.split_once('}').map(|(name, _)| name))
}

/// Arrays repeat the parameter name (form style, explode).
fn query_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(render_literal).collect(),
        other => render_literal(other).into_iter().collect(),
    }
}
