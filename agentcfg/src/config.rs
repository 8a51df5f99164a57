use serde::Deserialize;
use std::time::Duration;
use url::Url;

const DEFAULT_CACHE_EXPIRATION_SECS: u64 = 30;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 5;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StoreConfigError {
    #[error("store password requires a username")]
    PasswordWithoutUsername,
    #[error("store credentials must be either username/password or api_key, not both")]
    ConflictingCredentials,
    #[error("store timeout cannot be 0")]
    ZeroTimeout,
}

/// Connection settings for the upstream configuration store.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct StoreConfig {
    pub url: Url,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_store_timeout_secs() -> u64 {
    DEFAULT_STORE_TIMEOUT_SECS
}

impl StoreConfig {
    pub fn new(url: Url) -> Self {
        StoreConfig {
            url,
            username: None,
            password: None,
            api_key: None,
            timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), StoreConfigError> {
        if self.password.is_some() && self.username.is_none() {
            return Err(StoreConfigError::PasswordWithoutUsername);
        }
        if self.api_key.is_some() && self.username.is_some() {
            return Err(StoreConfigError::ConflictingCredentials);
        }
        if self.timeout_secs == 0 {
            return Err(StoreConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

/// How long fetched configuration is served from memory.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct CacheConfig {
    /// Zero disables positive caching; concurrent callers still share a fetch.
    #[serde(default = "default_cache_expiration_secs")]
    pub expiration_secs: u64,
}

fn default_cache_expiration_secs() -> u64 {
    DEFAULT_CACHE_EXPIRATION_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            expiration_secs: DEFAULT_CACHE_EXPIRATION_SECS,
        }
    }
}

impl CacheConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}
