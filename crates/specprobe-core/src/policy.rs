//! Run policy: concurrency, retry, timeout and request-shaping settings

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::Auth;
use crate::sampler::SamplerConfig;

/// Policy for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPolicy {
    /// Plans in flight at once; 0 and 1 both mean strictly sequential
    pub concurrency: usize,

    /// Retries after the first attempt (transport failures only)
    pub max_retries: u32,

    /// Delay before the first retry, doubled for each later one
    pub base_delay_ms: u64,

    /// Cap on any single backoff delay
    pub max_delay_ms: u64,

    /// Per-request timeout
    pub timeout_ms: u64,

    /// Check responses against the contract
    pub validate_responses: bool,

    /// HTTP headers added to every request (win over generated headers)
    pub headers: BTreeMap<String, String>,

    /// Fixed path parameter values (entity IDs, etc.)
    pub path_params: BTreeMap<String, String>,

    /// Credentials injected after all other headers
    pub auth: Option<Auth>,

    /// Sample value generation
    pub sampler: SamplerConfig,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            timeout_ms: 10_000,
            validate_responses: true,
            headers: BTreeMap::new(),
            path_params: BTreeMap::new(),
            auth: None,
            sampler: SamplerConfig::default(),
        }
    }
}

impl RunPolicy {
    /// Load policy from file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Parse policy from TOML text
    ///
    /// # Errors
    ///
    /// Returns error on malformed TOML or mistyped fields (negative counts
    /// included)
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject combinations no run can honor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        let inclusion = self.sampler.optional_inclusion;
        if !(0.0..=1.0).contains(&inclusion) {
            return Err(ConfigError::Invalid(format!(
                "sampler.optional_inclusion must be within 0.0..=1.0, got {inclusion}"
            )));
        }
        if let Some(name) = self.headers.keys().find(|name| !is_token(name)) {
            return Err(ConfigError::Invalid(format!("invalid header name {name:?}")));
        }
        if let Some(auth) = &self.auth {
            auth.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Annotated example policy file
    pub fn example() -> &'static str {
        r#"# specprobe run policy

# Plans in flight at once (0 or 1 = sequential)
concurrency = 4

# Retries after the first attempt, transport failures only
max_retries = 3
base_delay_ms = 1000
max_delay_ms = 10000

# Per-request timeout
timeout_ms = 10000

# Check status, content type and body against the contract
validate_responses = true

# Headers added to every request
[headers]
# X-Request-Source = "specprobe"

# Fixed path parameter values
[path_params]
# id = "1"

# Credentials
# [auth]
# type = "bearer"
# token = "your-token-here"

# Sample generation
[sampler]
optional_inclusion = 0.5
array_len = 2
max_depth = 5
seed = 0
"#
    }
}

/// HTTP token characters (RFC 9110 §5.6.2).
fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {0}: {1}")]
    Io(PathBuf, String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
