//! Maps every failure on the request path to a status and a client-facing
//! message.

use crate::auth::{AuthMethod, AuthenticationError, AuthorizationError};
use agentcfg::FetchError;
use http::{Method, StatusCode};

pub const MSG_SERVICE_NAME_REQUIRED: &str = "service.name is required";
pub const MSG_TIMEOUT: &str = "timed out waiting for configuration store";
pub const MSG_STORE_UNAUTHORIZED: &str = "the server is not authorized to query the configuration store. \
Please configure agent_config.store.username and agent_config.store.password \
(or agent_config.store.api_key), and ensure the user has the necessary privileges.";
pub const MSG_AUTHORIZER_UNAVAILABLE: &str = "the server could not verify the request's permissions. \
Please check the credentials configured for its authorization backend.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    MissingServiceName,
    InvalidBody,
    MethodNotAllowed,
    AuthenticationFailed,
    Forbidden,
    AuthorizerUnavailable,
    StoreUnauthorized,
    StoreUnavailable,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingServiceName => "missing_service_name",
            ErrorKind::InvalidBody => "invalid_body",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::AuthorizerUnavailable => "authorizer_unavailable",
            ErrorKind::StoreUnauthorized => "store_unauthorized",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::Timeout => "timeout",
        }
    }
}

/// A failure ready to be rendered as an error response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub message: String,
}

impl ClassifiedError {
    fn new(kind: ErrorKind, status: StatusCode, message: impl Into<String>) -> Self {
        ClassifiedError {
            kind,
            status,
            message: message.into(),
        }
    }

    pub fn missing_service_name() -> Self {
        Self::new(
            ErrorKind::MissingServiceName,
            StatusCode::BAD_REQUEST,
            MSG_SERVICE_NAME_REQUIRED,
        )
    }

    pub fn invalid_body(detail: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidBody,
            StatusCode::BAD_REQUEST,
            format!("invalid request body: {detail}"),
        )
    }

    pub fn method_not_allowed(method: &Method) -> Self {
        Self::new(
            ErrorKind::MethodNotAllowed,
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{method} not supported"),
        )
    }

    pub fn authentication(err: &AuthenticationError) -> Self {
        Self::new(
            ErrorKind::AuthenticationFailed,
            StatusCode::UNAUTHORIZED,
            format!("authentication failed: {err}"),
        )
    }

    pub fn authorization(err: &AuthorizationError, method: AuthMethod) -> Self {
        match err {
            AuthorizationError::Denied(detail) => {
                Self::new(ErrorKind::Forbidden, StatusCode::FORBIDDEN, detail.clone())
            }
            AuthorizationError::Unavailable { status, message } if method.is_anonymous() => {
                Self::new(
                    ErrorKind::AuthorizerUnavailable,
                    normalize_upstream_status(*status),
                    message.clone(),
                )
            }
            AuthorizationError::Unavailable { .. } => Self::new(
                ErrorKind::AuthorizerUnavailable,
                StatusCode::SERVICE_UNAVAILABLE,
                MSG_AUTHORIZER_UNAVAILABLE,
            ),
        }
    }

    /// Store failures are always 503. Anonymous callers never see upstream
    /// detail except the store's own text when it rejected our credentials.
    pub fn fetch(err: &FetchError, method: AuthMethod) -> Self {
        match err {
            FetchError::Unauthorized(upstream) if method.is_anonymous() => Self::new(
                ErrorKind::StoreUnauthorized,
                StatusCode::SERVICE_UNAVAILABLE,
                upstream.clone(),
            ),
            FetchError::Unauthorized(_) => Self::new(
                ErrorKind::StoreUnauthorized,
                StatusCode::SERVICE_UNAVAILABLE,
                MSG_STORE_UNAUTHORIZED,
            ),
            err if method.is_anonymous() => Self::new(
                ErrorKind::StoreUnavailable,
                StatusCode::SERVICE_UNAVAILABLE,
                err.generic_message(),
            ),
            err => Self::new(
                ErrorKind::StoreUnavailable,
                StatusCode::SERVICE_UNAVAILABLE,
                err.to_string(),
            ),
        }
    }

    pub fn timeout() -> Self {
        Self::new(
            ErrorKind::Timeout,
            StatusCode::SERVICE_UNAVAILABLE,
            MSG_TIMEOUT,
        )
    }
}

/// Gateway errors from upstream services are reported as 503.
fn normalize_upstream_status(status: StatusCode) -> StatusCode {
    if status == StatusCode::BAD_GATEWAY || status == StatusCode::GATEWAY_TIMEOUT {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        status
    }
}
