//! Configuration types for the Bailian client

use crate::error::{Error, Result};
use dotenvy::dotenv;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default endpoint of the completion service
pub const DEFAULT_COMPLETION_ENDPOINT: &str = "https://bailian.aliyuncs.com";

/// Default host of the identity (token issuing) service
pub const DEFAULT_POP_ENDPOINT: &str = "bailian.cn-beijing.aliyuncs.com";

/// Default timeout applied to unary completion calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Completion client configuration
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Completion service endpoint; `None` resolves to [`DEFAULT_COMPLETION_ENDPOINT`]
    pub endpoint: Option<String>,
    /// Timeout for unary calls. Streaming calls are never bounded by it.
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl CompletionConfig {
    /// Create a configuration using the default endpoint and timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Reads `BAILIAN_ENDPOINT` and `BAILIAN_TIMEOUT_SECS`, both optional.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let endpoint = std::env::var("BAILIAN_ENDPOINT").ok();
        let timeout = match std::env::var("BAILIAN_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                Error::config(format!("BAILIAN_TIMEOUT_SECS is not a number: {raw}"))
            })?),
            Err(_) => DEFAULT_TIMEOUT,
        };

        Ok(Self { endpoint, timeout })
    }

    /// Set the endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint with the default applied and trailing slashes removed
    pub fn resolved_endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.is_empty())
            .unwrap_or(DEFAULT_COMPLETION_ENDPOINT)
            .trim_end_matches('/')
    }
}

/// Credential bundle used to create access tokens
#[derive(Clone)]
pub struct Credentials {
    /// Access key id
    pub access_key_id: String,
    /// Access key secret
    pub access_key_secret: SecretString,
    /// Agent key the issued token is bound to
    pub agent_key: String,
    /// Identity service host; `None` resolves to [`DEFAULT_POP_ENDPOINT`]
    pub endpoint: Option<String>,
}

impl Credentials {
    /// Create a credential bundle
    pub fn new(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        agent_key: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: SecretString::from(access_key_secret.into()),
            agent_key: agent_key.into(),
            endpoint: None,
        }
    }

    /// Load credentials from `ACCESS_KEY_ID`, `ACCESS_KEY_SECRET`, `AGENT_KEY`
    /// and the optional `BAILIAN_POP_ENDPOINT`
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let required = |name: &str| {
            std::env::var(name)
                .map_err(|_| Error::config(format!("{name} environment variable not set")))
        };

        let mut credentials = Self::new(
            required("ACCESS_KEY_ID")?,
            required("ACCESS_KEY_SECRET")?,
            required("AGENT_KEY")?,
        );
        credentials.endpoint = std::env::var("BAILIAN_POP_ENDPOINT").ok();
        Ok(credentials)
    }

    /// Set the identity service endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Get the access key secret as a string
    pub fn access_key_secret(&self) -> &str {
        self.access_key_secret.expose_secret()
    }

    /// Identity endpoint with the default applied
    pub fn resolved_endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .filter(|endpoint| !endpoint.is_empty())
            .unwrap_or(DEFAULT_POP_ENDPOINT)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"***REDACTED***")
            .field("agent_key", &self.agent_key)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Layered settings: an optional config file overridden by `BAILIAN_*`
/// environment variables
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Access key id
    pub access_key_id: Option<String>,
    /// Access key secret
    pub access_key_secret: Option<String>,
    /// Agent key
    pub agent_key: Option<String>,
    /// Application id used for completion requests
    pub app_id: Option<String>,
    /// Completion service endpoint
    pub endpoint: Option<String>,
    /// Identity service host
    pub pop_endpoint: Option<String>,
    /// Unary call timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl ClientSettings {
    /// Load settings from an optional file and the environment
    ///
    /// The file format is inferred from its extension (toml, yaml, json, ...).
    /// `BAILIAN_ACCESS_KEY_ID` overrides `access_key_id`, and so on.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenv();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix("BAILIAN"))
            .build()?
            .try_deserialize::<Self>()?;

        Ok(settings)
    }

    /// Build a credential bundle; all three keys must be present
    pub fn credentials(&self) -> Result<Credentials> {
        let field = |value: &Option<String>, name: &str| {
            value
                .clone()
                .ok_or_else(|| Error::config(format!("missing setting: {name}")))
        };

        let mut credentials = Credentials::new(
            field(&self.access_key_id, "access_key_id")?,
            field(&self.access_key_secret, "access_key_secret")?,
            field(&self.agent_key, "agent_key")?,
        );
        credentials.endpoint = self.pop_endpoint.clone();
        Ok(credentials)
    }

    /// Build a completion configuration
    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            endpoint: self.endpoint.clone(),
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("access_key_id", &self.access_key_id)
            .field(
                "access_key_secret",
                &self.access_key_secret.as_ref().map(|_| "***REDACTED***"),
            )
            .field("agent_key", &self.agent_key)
            .field("app_id", &self.app_id)
            .field("endpoint", &self.endpoint)
            .field("pop_endpoint", &self.pop_endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
