//! Run data model: operations in, plans through, outcomes out.

use std::collections::BTreeMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::schema::Schema;

/// Methods whose requests carry a payload.
const BODIED_METHODS: &[&str] = &["POST", "PUT", "PATCH"];

/// Maximum number of contract violations quoted in an outcome message.
const MESSAGE_ERROR_LIMIT: usize = 3;

// ── Contract side ──

/// One HTTP method + path template from the contract. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    /// Upper-case HTTP method
    pub method: String,
    /// Path template, e.g. `/users/{id}`
    pub path_template: String,
    pub operation_id: Option<String>,
    pub path_params: Vec<ParamSpec>,
    pub query_params: Vec<ParamSpec>,
    pub header_params: Vec<ParamSpec>,
    pub request_body: Option<RequestBodySpec>,
    /// Status pattern (`"200"`, `"2XX"`, `"default"`) → declared response
    pub responses: BTreeMap<String, ResponseSpec>,
}

impl OperationDescriptor {
    #[must_use]
    pub fn new(method: &str, path_template: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path_template: path_template.to_string(),
            operation_id: None,
            path_params: Vec::new(),
            query_params: Vec::new(),
            header_params: Vec::new(),
            request_body: None,
            responses: BTreeMap::new(),
        }
    }

    /// Label used in logs and outcomes, e.g. `"GET /users/{id}"`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path_template)
    }

    #[must_use]
    pub fn carries_body(&self) -> bool {
        BODIED_METHODS.contains(&self.method.as_str())
    }

    /// Find the declared response for `status`: exact code, then range
    /// pattern (`2XX`), then `default`.
    #[must_use]
    pub fn match_response(&self, status: u16) -> Option<(&str, &ResponseSpec)> {
        let exact = status.to_string();
        if let Some((pattern, spec)) = self.responses.get_key_value(&exact) {
            return Some((pattern.as_str(), spec));
        }
        let range = format!("{}XX", status / 100);
        if let Some((pattern, spec)) = self
            .responses
            .iter()
            .find(|(pattern, _)| pattern.eq_ignore_ascii_case(&range))
        {
            return Some((pattern.as_str(), spec));
        }
        self.responses
            .get_key_value("default")
            .map(|(pattern, spec)| (pattern.as_str(), spec))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    pub schema: Schema,
}

impl ParamSpec {
    #[must_use]
    pub fn new(name: &str, schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            schema,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBodySpec {
    pub content_type: String,
    pub schema: Option<Schema>,
    /// Explicit media-level example; takes precedence over sampling
    pub example: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSpec {
    /// Media type → optional body schema. Empty when no content is declared.
    pub content: BTreeMap<String, Option<Schema>>,
}

impl ResponseSpec {
    /// A response declaring a single media type.
    #[must_use]
    pub fn with_content(media_type: &str, schema: Option<Schema>) -> Self {
        let mut content = BTreeMap::new();
        content.insert(media_type.to_string(), schema);
        Self { content }
    }
}

// ── Plans and attempts ──

/// A fully resolved request, consumed exactly once by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    /// Submission index (position of the operation in the contract)
    pub index: usize,
    pub method: String,
    /// Path template the plan was derived from
    pub endpoint: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(serialize_with = "serialize_body")]
    pub body: Option<Vec<u8>>,
}

fn serialize_body<S: Serializer>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match body {
        Some(bytes) => serializer.serialize_some(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}

impl ExecutionPlan {
    /// Set a header, replacing any existing header with the same
    /// case-insensitive name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.into());
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn label(&self) -> PlanLabel {
        PlanLabel {
            index: self.index,
            method: self.method.clone(),
            endpoint: self.endpoint.clone(),
            url: self.url.clone(),
        }
    }
}

/// Identity of a plan, carried into its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanLabel {
    pub index: usize,
    pub method: String,
    pub endpoint: String,
    pub url: String,
}

/// What the transport handed back for a request that reached the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResponseData {
    pub status: u16,
    /// Header names are lower-case
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl ResponseData {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }
}

/// Transport failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    ConnectionRefused,
    ConnectionReset,
    /// Connection could not be established for another reason
    Connect,
    Dns,
    Timeout,
    NetworkUnreachable,
    /// Response body could not be read
    Body,
    /// Request could not be built (bad method, header, URL)
    Request,
    /// Probe task ended without reporting
    Aborted,
    Other,
}

impl TransportErrorKind {
    /// Whether repeating the request may plausibly succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused
                | Self::ConnectionReset
                | Self::Connect
                | Self::Dns
                | Self::Timeout
                | Self::NetworkUnreachable
                | Self::Body
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionReset => "connection reset",
            Self::Connect => "connect error",
            Self::Dns => "dns failure",
            Self::Timeout => "timeout",
            Self::NetworkUnreachable => "network unreachable",
            Self::Body => "body read error",
            Self::Request => "invalid request",
            Self::Aborted => "aborted",
            Self::Other => "transport error",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request that never produced an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Response(ResponseData),
    TransportError {
        kind: TransportErrorKind,
        message: String,
    },
}

impl From<Result<ResponseData, TransportError>> for AttemptOutcome {
    fn from(result: Result<ResponseData, TransportError>) -> Self {
        match result {
            Ok(response) => Self::Response(response),
            Err(err) => Self::TransportError {
                kind: err.kind,
                message: err.message,
            },
        }
    }
}

/// One try of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Attempt {
    /// 1-indexed
    pub number: u32,
    /// Start time relative to the start of the plan's first attempt
    pub offset: Duration,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

impl Attempt {
    #[must_use]
    pub fn end(&self) -> Duration {
        self.offset + self.elapsed
    }

    #[must_use]
    pub fn response(&self) -> Option<&ResponseData> {
        match &self.outcome {
            AttemptOutcome::Response(response) => Some(response),
            AttemptOutcome::TransportError { .. } => None,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.outcome,
            AttemptOutcome::TransportError { kind, .. } if kind.is_retryable()
        )
    }
}

// ── Results ──

/// Outcome of checking one response against the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationReport {
    pub status_valid: bool,
    pub content_type_valid: bool,
    /// Every violation found, status and content-type mismatches included
    pub schema_errors: Vec<String>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::passing()
    }
}

impl ValidationReport {
    #[must_use]
    pub fn passing() -> Self {
        Self {
            status_valid: true,
            content_type_valid: true,
            schema_errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.status_valid && self.content_type_valid && self.schema_errors.is_empty()
    }
}

/// Marker serialized as the literal `"ERR"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ErrMarker {
    #[serde(rename = "ERR")]
    Err,
}

/// Final status of a plan: an HTTP status code, or `"ERR"` when no attempt
/// reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FinalStatus {
    Code(u16),
    Err(ErrMarker),
}

impl FinalStatus {
    pub const ERR: Self = Self::Err(ErrMarker::Err);

    #[must_use]
    pub const fn code(self) -> Option<u16> {
        match self {
            Self::Code(code) => Some(code),
            Self::Err(_) => None,
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Code(code) if code >= 200 && code < 300)
    }

    #[must_use]
    pub const fn is_err(self) -> bool {
        matches!(self, Self::Err(_))
    }
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Err(_) => f.write_str("ERR"),
        }
    }
}

/// The reported result of one plan after all attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TestOutcome {
    /// Submission index; sort by this for a stable display order
    pub index: usize,
    pub method: String,
    pub endpoint: String,
    pub url: String,
    pub final_status: FinalStatus,
    pub attempts: Vec<Attempt>,
    pub retry_count: u32,
    /// Wall time from the first attempt's start to the last attempt's end
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    pub message: String,
}

impl TestOutcome {
    /// Build the outcome of a plan from its attempt list.
    ///
    /// `attempts` must not be empty; an empty list is reported as an aborted
    /// plan so that every plan still yields exactly one outcome.
    #[must_use]
    pub fn from_attempts(
        label: PlanLabel,
        attempts: Vec<Attempt>,
        validation: Option<ValidationReport>,
    ) -> Self {
        let Some(last) = attempts.last() else {
            return Self::aborted(label, "no attempt was made");
        };

        let (final_status, mut message) = match &last.outcome {
            AttemptOutcome::Response(response) => {
                (FinalStatus::Code(response.status), format!("HTTP {}", response.status))
            }
            AttemptOutcome::TransportError { kind, message } => {
                let tries = if attempts.len() == 1 {
                    "1 attempt".to_string()
                } else {
                    format!("{} attempts", attempts.len())
                };
                (FinalStatus::ERR, format!("{kind}: {message} (after {tries})"))
            }
        };

        if let Some(report) = validation.as_ref().filter(|r| !r.is_pass()) {
            let shown: Vec<&str> = report
                .schema_errors
                .iter()
                .take(MESSAGE_ERROR_LIMIT)
                .map(String::as_str)
                .collect();
            message.push_str(&format!(
                "; {} contract violation(s): {}",
                report.schema_errors.len(),
                shown.join("; ")
            ));
        }

        let duration = last.end();
        let retry_count = u32::try_from(attempts.len() - 1).unwrap_or(u32::MAX);

        Self {
            index: label.index,
            method: label.method,
            endpoint: label.endpoint,
            url: label.url,
            final_status,
            attempts,
            retry_count,
            duration,
            validation,
            message,
        }
    }

    /// Outcome for a plan whose task ended without reporting.
    #[must_use]
    pub fn aborted(label: PlanLabel, reason: &str) -> Self {
        let attempt = Attempt {
            number: 1,
            offset: Duration::ZERO,
            elapsed: Duration::ZERO,
            outcome: AttemptOutcome::TransportError {
                kind: TransportErrorKind::Aborted,
                message: reason.to_string(),
            },
        };
        Self {
            index: label.index,
            method: label.method,
            endpoint: label.endpoint,
            url: label.url,
            final_status: FinalStatus::ERR,
            attempts: vec![attempt],
            retry_count: 0,
            duration: Duration::ZERO,
            validation: None,
            message: format!("aborted: {reason}"),
        }
    }

    /// Passed iff the final status is 2xx and any validation report passes.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.final_status.is_success()
            && self
                .validation
                .as_ref()
                .is_none_or(ValidationReport::is_pass)
    }

    /// `"GET /users/{id}"`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> PlanLabel {
        PlanLabel {
            index: 3,
            method: "GET".into(),
            endpoint: "/posts/{id}".into(),
            url: "http://localhost:8080/posts/1".into(),
        }
    }

    fn transport_attempt(number: u32, offset_ms: u64) -> Attempt {
        Attempt {
            number,
            offset: Duration::from_millis(offset_ms),
            elapsed: Duration::from_millis(5),
            outcome: AttemptOutcome::TransportError {
                kind: TransportErrorKind::ConnectionRefused,
                message: "refused".into(),
            },
        }
    }

    fn response_attempt(number: u32, offset_ms: u64, status: u16) -> Attempt {
        Attempt {
            number,
            offset: Duration::from_millis(offset_ms),
            elapsed: Duration::from_millis(10),
            outcome: AttemptOutcome::Response(ResponseData::new(status)),
        }
    }

    #[test]
    fn retry_count_is_attempts_minus_one() {
        let attempts = vec![
            transport_attempt(1, 0),
            transport_attempt(2, 1000),
            response_attempt(3, 3000, 200),
        ];
        let outcome = TestOutcome::from_attempts(label(), attempts, None);
        assert_eq!(outcome.retry_count, 2);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.final_status, FinalStatus::Code(200));
        assert_eq!(outcome.duration, Duration::from_millis(3010));
        assert!(outcome.passed());
    }

    #[test]
    fn exhausted_transport_errors_report_err() {
        let attempts = vec![transport_attempt(1, 0), transport_attempt(2, 1000)];
        let outcome = TestOutcome::from_attempts(label(), attempts, None);
        assert_eq!(outcome.final_status, FinalStatus::ERR);
        assert!(outcome.message.contains("connection refused"));
        assert!(outcome.message.contains("after 2 attempts"));
        assert!(!outcome.passed());
    }

    #[test]
    fn failing_validation_fails_a_2xx() {
        let report = ValidationReport {
            status_valid: true,
            content_type_valid: true,
            schema_errors: vec!["$.id: expected integer, found string".into()],
        };
        let outcome =
            TestOutcome::from_attempts(label(), vec![response_attempt(1, 0, 200)], Some(report));
        assert!(!outcome.passed());
        assert!(outcome.message.contains("1 contract violation(s)"));
    }

    #[test]
    fn empty_attempts_become_aborted_outcome() {
        let outcome = TestOutcome::from_attempts(label(), Vec::new(), None);
        assert_eq!(outcome.final_status, FinalStatus::ERR);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.retry_count, 0);
    }

    #[test]
    fn final_status_serializes_as_code_or_err() {
        assert_eq!(serde_json::to_string(&FinalStatus::Code(404)).unwrap(), "404");
        assert_eq!(serde_json::to_string(&FinalStatus::ERR).unwrap(), "\"ERR\"");
        let parsed: FinalStatus = serde_json::from_str("\"ERR\"").unwrap();
        assert_eq!(parsed, FinalStatus::ERR);
        let parsed: FinalStatus = serde_json::from_str("201").unwrap();
        assert_eq!(parsed, FinalStatus::Code(201));
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut plan = ExecutionPlan {
            index: 0,
            method: "POST".into(),
            endpoint: "/users".into(),
            url: "http://localhost/users".into(),
            headers: BTreeMap::from([("Content-Type".to_string(), "text/plain".to_string())]),
            body: None,
        };
        plan.set_header("content-type", "application/json");
        assert_eq!(plan.headers.len(), 1);
        assert_eq!(plan.header("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn match_response_prefers_exact_then_range_then_default() {
        let mut op = OperationDescriptor::new("get", "/things");
        op.responses.insert("200".into(), ResponseSpec::default());
        op.responses.insert("4XX".into(), ResponseSpec::default());
        op.responses.insert("default".into(), ResponseSpec::default());

        assert_eq!(op.match_response(200).map(|(p, _)| p), Some("200"));
        assert_eq!(op.match_response(404).map(|(p, _)| p), Some("4XX"));
        assert_eq!(op.match_response(500).map(|(p, _)| p), Some("default"));
    }

    #[test]
    fn retryable_kinds() {
        assert!(TransportErrorKind::ConnectionRefused.is_retryable());
        assert!(TransportErrorKind::Timeout.is_retryable());
        assert!(TransportErrorKind::Dns.is_retryable());
        assert!(!TransportErrorKind::Request.is_retryable());
        assert!(!TransportErrorKind::Aborted.is_retryable());
    }

    #[test]
    fn bodied_methods() {
        assert!(OperationDescriptor::new("post", "/a").carries_body());
        assert!(OperationDescriptor::new("PATCH", "/a").carries_body());
        assert!(!OperationDescriptor::new("GET", "/a").carries_body());
        assert!(!OperationDescriptor::new("DELETE", "/a").carries_body());
    }
}
