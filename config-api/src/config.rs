use agentcfg::config::{CacheConfig, StoreConfig, StoreConfigError};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Secret token cannot be empty")]
    EmptySecretToken,

    #[error("Empty agent name in {0}")]
    EmptyAgentName(&'static str),

    #[error("Request timeout cannot be 0")]
    ZeroRequestTimeout,

    #[error("Invalid store configuration: {0}")]
    Store(#[from] StoreConfigError),
}

/// Agent configuration API settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener serving agent configuration requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub agent_config: AgentConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.auth.validate()?;
        self.agent_config.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Request authentication.
///
/// Without a secret token every request is accepted.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AuthConfig {
    #[serde(default)]
    pub secret_token: Option<String>,
    #[serde(default)]
    pub anonymous: AnonymousConfig,
}

impl AuthConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.secret_token.as_deref() == Some("") {
            return Err(ValidationError::EmptySecretToken);
        }
        if self.anonymous.allow_agent.iter().any(|a| a.is_empty()) {
            return Err(ValidationError::EmptyAgentName("auth.anonymous.allow_agent"));
        }
        Ok(())
    }
}

/// Unauthenticated access to the RUM endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AnonymousConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rum_agents")]
    pub allow_agent: Vec<String>,
    /// Empty means any service.
    #[serde(default)]
    pub allow_service: Vec<String>,
}

impl Default for AnonymousConfig {
    fn default() -> Self {
        AnonymousConfig {
            enabled: true,
            allow_agent: default_rum_agents(),
            allow_service: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    /// Environment used when a request does not name one.
    #[serde(default)]
    pub default_service_environment: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub rum: RumConfig,
    /// Without a store every request fails with 503.
    #[serde(default)]
    pub store: Option<StoreConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            cache: CacheConfig::default(),
            default_service_environment: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            rum: RumConfig::default(),
            store: None,
        }
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::ZeroRequestTimeout);
        }
        if self.rum.allow_agents.iter().any(|a| a.is_empty()) {
            return Err(ValidationError::EmptyAgentName(
                "agent_config.rum.allow_agents",
            ));
        }
        if let Some(store) = &self.store {
            store.validate()?;
        }
        Ok(())
    }
}

/// What browser agents may see.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RumConfig {
    #[serde(default = "default_rum_agents")]
    pub allow_agents: Vec<String>,
    /// Empty means all settings.
    #[serde(default = "default_rum_settings")]
    pub allow_settings: Vec<String>,
}

impl Default for RumConfig {
    fn default() -> Self {
        RumConfig {
            allow_agents: default_rum_agents(),
            allow_settings: default_rum_settings(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_rum_agents() -> Vec<String> {
    vec!["rum-js".to_string(), "js-base".to_string()]
}

fn default_rum_settings() -> Vec<String> {
    vec!["transaction_sample_rate".to_string()]
}
