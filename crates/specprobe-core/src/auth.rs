//! Credential injection into execution plans
//!
//! Decorators run after the planner has applied generated and caller headers,
//! so whatever they set wins.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::model::ExecutionPlan;
use crate::policy::ConfigError;

/// Last-step mutation of a plan before it is sent.
pub trait PlanDecorator: Send + Sync {
    fn decorate(&self, plan: &mut ExecutionPlan);
}

impl<F> PlanDecorator for F
where
    F: Fn(&mut ExecutionPlan) + Send + Sync,
{
    fn decorate(&self, plan: &mut ExecutionPlan) {
        self(plan);
    }
}

/// Supported credential schemes.
///
/// ```toml
/// [auth]
/// type = "basic"
/// username = "admin"
/// password = "secret"
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Auth {
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// Arbitrary header, e.g. `X-API-Key: <value>`
    ApiKey { header: String, value: String },
    /// `Authorization: Basic base64(user:password)`
    Basic { username: String, password: String },
}

impl Auth {
    /// Header name and value this scheme injects.
    #[must_use]
    pub fn header(&self) -> (&str, String) {
        match self {
            Self::Bearer { token } => ("Authorization", format!("Bearer {token}")),
            Self::ApiKey { header, value } => (header.as_str(), value.clone()),
            Self::Basic { username, password } => (
                "Authorization",
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}"))),
            ),
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for empty credentials or an empty
    /// API-key header name
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Bearer { token } if token.is_empty() => {
                Err(ConfigError::Invalid("auth.token is empty".into()))
            }
            Self::ApiKey { header, .. } if header.trim().is_empty() => {
                Err(ConfigError::Invalid("auth.header is empty".into()))
            }
            Self::Basic { username, .. } if username.is_empty() => {
                Err(ConfigError::Invalid("auth.username is empty".into()))
            }
            _ => Ok(()),
        }
    }
}

impl PlanDecorator for Auth {
    fn decorate(&self, plan: &mut ExecutionPlan) {
        let (name, value) = self.header();
        plan.set_header(name, value);
    }
}

// Credentials stay out of logs.
impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer { .. } => f.write_str("Auth::Bearer(***)"),
            Self::ApiKey { header, .. } => write!(f, "Auth::ApiKey({header}: ***)"),
            Self::Basic { username, .. } => write!(f, "Auth::Basic({username}:***)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn plan() -> ExecutionPlan {
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), "stale".to_string());
        ExecutionPlan {
            index: 0,
            method: "GET".into(),
            endpoint: "/me".into(),
            url: "http://localhost/me".into(),
            headers,
            body: None,
        }
    }

    #[test]
    fn bearer_replaces_existing_authorization() {
        let mut plan = plan();
        Auth::Bearer { token: "t0k".into() }.decorate(&mut plan);
        assert_eq!(plan.header("Authorization"), Some("Bearer t0k"));
        assert_eq!(plan.headers.len(), 1);
    }

    #[test]
    fn basic_is_base64_encoded() {
        let mut plan = plan();
        Auth::Basic {
            username: "Aladdin".into(),
            password: "open sesame".into(),
        }
        .decorate(&mut plan);
        assert_eq!(
            plan.header("authorization"),
            Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==")
        );
    }

    #[test]
    fn api_key_uses_configured_header() {
        let mut plan = plan();
        Auth::ApiKey {
            header: "X-API-Key".into(),
            value: "k".into(),
        }
        .decorate(&mut plan);
        assert_eq!(plan.header("x-api-key"), Some("k"));
        assert_eq!(plan.header("authorization"), Some("stale"));
    }

    #[test]
    fn closures_are_decorators() {
        let mut plan = plan();
        let decorator = |plan: &mut ExecutionPlan| plan.set_header("X-Run", "1");
        decorator.decorate(&mut plan);
        assert_eq!(plan.header("x-run"), Some("1"));
    }

    #[test]
    fn debug_hides_secrets() {
        let auth = Auth::Basic {
            username: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{auth:?}").contains("hunter2"));
    }

    #[test]
    fn validate_rejects_empty_token() {
        assert!(Auth::Bearer { token: String::new() }.validate().is_err());
        assert!(Auth::Bearer { token: "x".into() }.validate().is_ok());
    }
}
