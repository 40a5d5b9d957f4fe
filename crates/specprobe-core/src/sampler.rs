//! Schema → representative `serde_json::Value`
//!
//! Unlike a fuzzer, the sampler aims for the most ordinary value a schema
//! admits: examples and defaults first, then the first enum value, midpoints of
//! numeric ranges, and format-shaped string literals. The only random choice
//! (inclusion of optional object properties) is driven by an RNG reseeded from
//! [`SamplerConfig::seed`] on every call, so `sample` is a pure function of the
//! schema and the configuration.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{
    ArrayRules, Composition, CompositionMode, NumericRules, ObjectRules, Schema, SchemaKind,
    SchemaRegistry, StringRules,
};

/// Placeholder for strings and untyped values.
pub const PLACEHOLDER: &str = "sample";

const DEFAULT_INTEGER: i64 = 1;
const DEFAULT_NUMBER: f64 = 1.0;

/// Caps applied to schema-declared minimums (prevents OOM on absurd values).
const MAX_STRING_LEN: u64 = 10_000;
const MAX_ARRAY_LEN: u64 = 64;

/// Sampler knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Probability that an optional object property is included
    pub optional_inclusion: f64,
    /// Number of items produced for arrays (clamped to minItems/maxItems)
    pub array_len: usize,
    /// Nesting depth past which the sampler gives up and returns `null`
    pub max_depth: u32,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            optional_inclusion: 0.5,
            array_len: 2,
            max_depth: 5,
            seed: 0,
        }
    }
}

/// Produces representative values for schemas of one contract.
#[derive(Debug, Clone)]
pub struct SchemaSampler<'a> {
    registry: &'a SchemaRegistry,
    config: SamplerConfig,
}

impl<'a> SchemaSampler<'a> {
    #[must_use]
    pub fn new(registry: &'a SchemaRegistry, config: SamplerConfig) -> Self {
        Self { registry, config }
    }

    #[must_use]
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Produce a value for `schema`.
    #[must_use]
    pub fn sample(&self, schema: &Schema) -> Value {
        let mut rng = SmallRng::seed_from_u64(self.config.seed);
        self.sample_inner(schema, &mut rng, 0)
    }

    fn sample_inner(&self, schema: &Schema, rng: &mut SmallRng, depth: u32) -> Value {
        if depth > self.config.max_depth {
            tracing::debug!(depth, "schema nesting exceeds sampler depth, substituting null");
            return Value::Null;
        }

        if let Some(example) = &schema.meta.example {
            return example.clone();
        }
        if let Some(default) = &schema.meta.default {
            return default.clone();
        }
        if let Some(first) = schema.meta.enum_values.first() {
            return first.clone();
        }

        match &schema.kind {
            SchemaKind::Any => Value::String(PLACEHOLDER.into()),
            SchemaKind::Null => Value::Null,
            SchemaKind::Boolean => Value::Bool(true),
            SchemaKind::Integer(rules) => sample_integer(rules),
            SchemaKind::Number(rules) => sample_number(rules),
            SchemaKind::String(rules) => sample_string(rules),
            SchemaKind::Array(rules) => self.sample_array(rules, rng, depth),
            SchemaKind::Object(rules) => self.sample_object(rules, rng, depth),
            SchemaKind::Composition(comp) => self.sample_composition(comp, rng, depth),
            SchemaKind::Ref(reference) => match self.registry.resolve(reference) {
                Some(target) => self.sample_inner(target, rng, depth + 1),
                None => {
                    tracing::debug!(%reference, "unresolvable $ref, substituting null");
                    Value::Null
                }
            },
        }
    }

    fn sample_array(&self, rules: &ArrayRules, rng: &mut SmallRng, depth: u32) -> Value {
        let requested = rules.min_items.unwrap_or(0);
        if requested > MAX_ARRAY_LEN {
            tracing::debug!(
                min_items = requested,
                cap = MAX_ARRAY_LEN,
                "minItems exceeds sampler cap, array will be short"
            );
        }
        let min = requested.min(MAX_ARRAY_LEN) as usize;
        let max = rules
            .max_items
            .map_or(usize::MAX, |m| usize::try_from(m).unwrap_or(usize::MAX));
        let len = self.config.array_len.max(min).min(max);

        Value::Array(
            (0..len)
                .map(|_| match &rules.items {
                    Some(items) => self.sample_inner(items, rng, depth + 1),
                    None => Value::String(PLACEHOLDER.into()),
                })
                .collect(),
        )
    }

    fn sample_object(&self, rules: &ObjectRules, rng: &mut SmallRng, depth: u32) -> Value {
        Value::Object(self.object_map(rules, rng, depth))
    }

    fn object_map(&self, rules: &ObjectRules, rng: &mut SmallRng, depth: u32) -> Map<String, Value> {
        let inclusion = if (0.0..=1.0).contains(&self.config.optional_inclusion) {
            self.config.optional_inclusion
        } else {
            SamplerConfig::default().optional_inclusion
        };

        let mut obj = Map::new();
        for (name, prop) in &rules.properties {
            if rules.is_required(name) || rng.gen_bool(inclusion) {
                obj.insert(name.clone(), self.sample_inner(prop, rng, depth + 1));
            }
        }
        // Required names without a declared schema still have to be present.
        for name in &rules.required {
            if !obj.contains_key(name) {
                obj.insert(name.clone(), Value::String(PLACEHOLDER.into()));
            }
        }
        obj
    }

    fn sample_composition(&self, comp: &Composition, rng: &mut SmallRng, depth: u32) -> Value {
        match comp.mode {
            CompositionMode::OneOf | CompositionMode::AnyOf => {
                // First branch, skipping a leading `null` alternative.
                let branch = comp
                    .branches
                    .iter()
                    .find(|b| b.kind != SchemaKind::Null)
                    .or_else(|| comp.branches.first());
                match branch {
                    Some(branch) => self.sample_inner(branch, rng, depth + 1),
                    None => Value::Null,
                }
            }
            CompositionMode::AllOf => {
                // Object branches share one rule set; a branch listing only
                // `required` picks up the property schema declared elsewhere.
                let mut rules = ObjectRules::default();
                let mut rest = Vec::new();
                for branch in &comp.branches {
                    if !self.collect_object_rules(branch, &mut rules, depth) {
                        rest.push(branch);
                    }
                }

                let mut merged = self.object_map(&rules, rng, depth);
                let mut fallback = None;
                for branch in rest {
                    match self.sample_inner(branch, rng, depth + 1) {
                        Value::Object(obj) => {
                            for (key, value) in obj {
                                merged.entry(key).or_insert(value);
                            }
                        }
                        other => {
                            fallback.get_or_insert(other);
                        }
                    }
                }
                if merged.is_empty() {
                    fallback.unwrap_or(Value::Object(merged))
                } else {
                    Value::Object(merged)
                }
            }
        }
    }

    /// Fold an `allOf` branch's object rules into `into`. Returns `false` for
    /// branches that must be sampled on their own (non-objects, or branches
    /// carrying an example, default or enum).
    fn collect_object_rules(&self, schema: &Schema, into: &mut ObjectRules, depth: u32) -> bool {
        if depth > self.config.max_depth {
            return false;
        }
        let meta = &schema.meta;
        if meta.example.is_some() || meta.default.is_some() || !meta.enum_values.is_empty() {
            return false;
        }

        match &schema.kind {
            SchemaKind::Object(rules) => {
                for (name, prop) in &rules.properties {
                    if into.property(name).is_none() {
                        into.properties.push((name.clone(), prop.clone()));
                    }
                }
                for name in &rules.required {
                    if !into.is_required(name) {
                        into.required.push(name.clone());
                    }
                }
                true
            }
            SchemaKind::Ref(reference) => self
                .registry
                .resolve(reference)
                .is_some_and(|target| self.collect_object_rules(target, into, depth + 1)),
            SchemaKind::Composition(Composition {
                mode: CompositionMode::AllOf,
                branches,
            }) => branches.iter().all(|branch| self.collect_object_rules(branch, into, depth + 1)),
            _ => false,
        }
    }
}

fn sample_integer(rules: &NumericRules) -> Value {
    let value = match (rules.integer_lower(), rules.integer_upper()) {
        (Some(lo), Some(hi)) if lo <= hi => {
            let mid = (i128::from(lo) + i128::from(hi)).div_euclid(2);
            i64::try_from(mid).unwrap_or(lo)
        }
        (Some(lo), Some(_)) => lo,
        (Some(lo), None) => DEFAULT_INTEGER.max(lo),
        (None, Some(hi)) => DEFAULT_INTEGER.min(hi),
        (None, None) => DEFAULT_INTEGER,
    };
    let value = rules
        .multiple_of
        .and_then(|step| align_integer(value, step, rules))
        .unwrap_or(value);
    Value::from(value)
}

/// A multiple of `step` next to `value` that the bounds still admit.
fn align_integer(value: i64, step: f64, rules: &NumericRules) -> Option<i64> {
    if step < 1.0 || step.fract() != 0.0 || step >= i64::MAX as f64 {
        return None;
    }
    let step = step as i64;
    let down = value.div_euclid(step).checked_mul(step)?;
    let up = down.checked_add(step);
    let lower = rules.integer_lower();
    let upper = rules.integer_upper();
    [Some(down), up]
        .into_iter()
        .flatten()
        .find(|v| lower.is_none_or(|lo| *v >= lo) && upper.is_none_or(|hi| *v <= hi))
}

fn sample_number(rules: &NumericRules) -> Value {
    let lower = rules.minimum.or(rules.exclusive_minimum);
    let upper = rules.maximum.or(rules.exclusive_maximum);
    let value = match (lower, upper) {
        (Some(lo), Some(hi)) => lo + (hi - lo) / 2.0,
        (Some(lo), None) if DEFAULT_NUMBER > lo => DEFAULT_NUMBER,
        (Some(lo), None) if rules.minimum.is_none() => lo + 1.0,
        (Some(lo), None) => lo,
        (None, Some(hi)) if DEFAULT_NUMBER < hi => DEFAULT_NUMBER,
        (None, Some(hi)) if rules.maximum.is_none() => hi - 1.0,
        (None, Some(hi)) => hi,
        (None, None) => DEFAULT_NUMBER,
    };
    let value = rules
        .multiple_of
        .and_then(|step| align_number(value, step, rules))
        .unwrap_or(value);
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn align_number(value: f64, step: f64, rules: &NumericRules) -> Option<f64> {
    let base = (value / step).floor();
    [base, base + 1.0]
        .into_iter()
        .map(|k| k * step)
        .find(|v| v.is_finite() && number_within(*v, rules))
}

fn number_within(v: f64, rules: &NumericRules) -> bool {
    rules.minimum.is_none_or(|m| v >= m)
        && rules.maximum.is_none_or(|m| v <= m)
        && rules.exclusive_minimum.is_none_or(|m| v > m)
        && rules.exclusive_maximum.is_none_or(|m| v < m)
}

fn sample_string(rules: &StringRules) -> Value {
    let literal = match rules.format.as_deref() {
        Some("email") => "user@example.com",
        Some("uri" | "url" | "uri-reference") => "https://example.com/resource",
        Some("date") => "2024-01-15",
        Some("date-time") => "2024-01-15T12:00:00Z",
        Some("uuid") => "3fa85f64-5717-4562-b3fc-2c963f66afa6",
        _ => return Value::String(placeholder_string(rules)),
    };
    Value::String(literal.to_string())
}

/// `"sample"`, padded with `x` up to `minLength` and cut down to `maxLength`.
fn placeholder_string(rules: &StringRules) -> String {
    let mut value = String::from(PLACEHOLDER);
    let requested = rules.min_length.unwrap_or(0);
    if requested > MAX_STRING_LEN {
        tracing::debug!(
            min_length = requested,
            cap = MAX_STRING_LEN,
            "minLength exceeds sampler cap, string will be short"
        );
    }
    let min = requested.min(MAX_STRING_LEN) as usize;
    if value.len() < min {
        value.push_str(&"x".repeat(min - value.len()));
    }
    if let Some(max) = rules.max_length {
        value.truncate(usize::try_from(max).unwrap_or(usize::MAX));
    }
    value
}
