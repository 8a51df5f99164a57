use crate::types::{Service, StoreDocument};
use crate::version::Version;
use async_trait::async_trait;

pub const ERR_MSG_STORE_DISABLED: &str = "no connection to configuration store";
pub const ERR_MSG_STORE_UNREACHABLE: &str = "could not reach configuration store";
pub const ERR_MSG_SEND_FAILED: &str = "sending query to configuration store failed";
pub const ERR_MSG_VERSION_INCOMPATIBLE: &str = "not a compatible configuration store version";
pub const ERR_MSG_UNAUTHORIZED: &str = "configuration store rejected the server's credentials";

/// Failure to obtain a service's configuration from the store.
///
/// Cloned once per waiter when several callers share one fetch.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum FetchError {
    #[error("no connection to configuration store")]
    StoreDisabled,

    #[error("could not reach configuration store: {0}")]
    Unreachable(String),

    #[error("sending query to configuration store failed: {0}")]
    SendFailed(String),

    #[error(
        "not a compatible configuration store version: minimum version {minimum}, configured version {configured}"
    )]
    VersionIncompatible {
        minimum: Version,
        configured: Version,
    },

    /// The store rejected the server's own credentials. Carries the store's
    /// error text.
    #[error("configuration store rejected the server's credentials: {0}")]
    Unauthorized(String),
}

impl FetchError {
    /// The message without any upstream detail.
    pub fn generic_message(&self) -> &'static str {
        match self {
            FetchError::StoreDisabled => ERR_MSG_STORE_DISABLED,
            FetchError::Unreachable(_) => ERR_MSG_STORE_UNREACHABLE,
            FetchError::SendFailed(_) => ERR_MSG_SEND_FAILED,
            FetchError::VersionIncompatible { .. } => ERR_MSG_VERSION_INCOMPATIBLE,
            FetchError::Unauthorized(_) => ERR_MSG_UNAUTHORIZED,
        }
    }
}

/// Upstream document store holding agent configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns the document for `service`, or `None` if none exists.
    async fn query(&self, service: &Service) -> Result<Option<StoreDocument>, FetchError>;
}
