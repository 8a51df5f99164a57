use crate::config::ValidationError;
use thiserror::Error;

/// Errors that prevent the config API from starting or serving
#[derive(Error, Debug)]
pub enum ConfigApiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("Failed to create configuration store client: {0}")]
    StoreClient(#[from] reqwest::Error),
}
