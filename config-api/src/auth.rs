//! Request authentication and the authorization gate in front of the fetcher.

use crate::classify::ClassifiedError;
use crate::config::AuthConfig;
use crate::request::Endpoint;
use agentcfg::Query;
use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// How the caller was authenticated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    /// Authentication is disabled.
    None,
    /// Unauthenticated access to the RUM endpoint.
    Anonymous,
    SecretToken,
}

impl AuthMethod {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, AuthMethod::Anonymous)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    AgentConfig,
}

/// What a request wants to access.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resource {
    pub service_name: String,
    pub agent_name: Option<String>,
}

impl From<&Query> for Resource {
    fn from(query: &Query) -> Self {
        Resource {
            service_name: query.service.name.clone(),
            agent_name: query.agent_name.clone(),
        }
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationError {
    /// The caller may not access the resource.
    #[error("{0}")]
    Denied(String),

    /// The authorization backend could not decide.
    #[error("{message}")]
    Unavailable { status: StatusCode, message: String },
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, action: Action, resource: &Resource)
    -> Result<(), AuthorizationError>;
}

/// Grants everything. Used for callers holding the secret token.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(
        &self,
        _action: Action,
        _resource: &Resource,
    ) -> Result<(), AuthorizationError> {
        Ok(())
    }
}

/// Restricts anonymous callers to configured services and agents.
pub struct AnonymousAuthorizer {
    allow_service: Vec<String>,
    allow_agent: Vec<String>,
}

impl AnonymousAuthorizer {
    pub fn new(allow_service: Vec<String>, allow_agent: Vec<String>) -> Self {
        AnonymousAuthorizer {
            allow_service,
            allow_agent,
        }
    }
}

#[async_trait]
impl Authorizer for AnonymousAuthorizer {
    async fn authorize(
        &self,
        _action: Action,
        resource: &Resource,
    ) -> Result<(), AuthorizationError> {
        if !self.allow_service.is_empty() && !self.allow_service.contains(&resource.service_name)
        {
            return Err(AuthorizationError::Denied(format!(
                "unauthorized: anonymous access not permitted for service \"{}\"",
                resource.service_name
            )));
        }
        if let Some(agent) = &resource.agent_name {
            if !self.allow_agent.contains(agent) {
                return Err(AuthorizationError::Denied(format!(
                    "unauthorized: anonymous access not permitted for agent \"{agent}\""
                )));
            }
        }
        Ok(())
    }
}

/// The outcome of authenticating one request.
#[derive(Clone)]
pub struct Authentication {
    pub method: AuthMethod,
    /// `None` means every resource is accessible.
    pub authorizer: Option<Arc<dyn Authorizer>>,
}

impl Authentication {
    pub fn new(method: AuthMethod, authorizer: Option<Arc<dyn Authorizer>>) -> Self {
        Authentication { method, authorizer }
    }

    pub fn disabled() -> Self {
        Authentication::new(AuthMethod::None, None)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("missing Authorization header")]
    MissingCredentials,

    #[error("malformed Authorization header")]
    MalformedHeader,

    #[error("invalid token")]
    InvalidToken,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        endpoint: Endpoint,
    ) -> Result<Authentication, AuthenticationError>;
}

/// Authenticates against the secret token from the config file.
pub struct ConfigAuthenticator {
    secret_token: Option<String>,
    anonymous: Option<Arc<dyn Authorizer>>,
}

impl ConfigAuthenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let anonymous = config.anonymous.enabled.then(|| {
            Arc::new(AnonymousAuthorizer::new(
                config.anonymous.allow_service.clone(),
                config.anonymous.allow_agent.clone(),
            )) as Arc<dyn Authorizer>
        });
        ConfigAuthenticator {
            secret_token: config.secret_token.clone(),
            anonymous,
        }
    }
}

#[async_trait]
impl Authenticator for ConfigAuthenticator {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        endpoint: Endpoint,
    ) -> Result<Authentication, AuthenticationError> {
        let Some(secret_token) = &self.secret_token else {
            return Ok(Authentication::disabled());
        };

        let Some(header) = headers.get(AUTHORIZATION) else {
            return match (&self.anonymous, endpoint) {
                (Some(authorizer), Endpoint::Rum) => Ok(Authentication::new(
                    AuthMethod::Anonymous,
                    Some(authorizer.clone()),
                )),
                _ => Err(AuthenticationError::MissingCredentials),
            };
        };

        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(AuthenticationError::MalformedHeader)?;

        if !bool::from(token.as_bytes().ct_eq(secret_token.as_bytes())) {
            return Err(AuthenticationError::InvalidToken);
        }
        Ok(Authentication::new(
            AuthMethod::SecretToken,
            Some(Arc::new(AllowAll)),
        ))
    }
}

/// Checks that the authenticated caller may read configuration for `query`.
pub async fn authorize_query(
    authentication: &Authentication,
    query: &Query,
) -> Result<(), ClassifiedError> {
    let Some(authorizer) = &authentication.authorizer else {
        return Ok(());
    };
    authorizer
        .authorize(Action::AgentConfig, &Resource::from(query))
        .await
        .map_err(|err| {
            tracing::debug!(error = %err, service = %query.service.name, "authorization failed");
            ClassifiedError::authorization(&err, authentication.method)
        })
}
