//! Turns HTTP requests into normalized [`Query`] values.

use crate::classify::ClassifiedError;
use agentcfg::{Query, Service};
use http::header::IF_NONE_MATCH;
use http::{HeaderMap, Method, Request};
use hyper::body::Bytes;
use serde::Deserialize;

pub const BACKEND_PATH: &str = "/config/v1/agents";
pub const RUM_PATH: &str = "/config/v1/rum/agents";

const PARAM_SERVICE_NAME: &str = "service.name";
const PARAM_SERVICE_ENVIRONMENT: &str = "service.environment";
const PARAM_AGENT_NAME: &str = "agent.name";
const PARAM_IF_NONE_MATCH: &str = "ifnonematch";

/// Which of the two agent configuration routes a request arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// Backend agents.
    Backend,
    /// Browser (real user monitoring) agents.
    Rum,
}

impl Endpoint {
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.strip_suffix('/').unwrap_or(path);
        match path {
            BACKEND_PATH => Some(Endpoint::Backend),
            RUM_PATH => Some(Endpoint::Rum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Backend => "backend",
            Endpoint::Rum => "rum",
        }
    }
}

#[derive(Deserialize)]
struct QueryBody {
    #[serde(default)]
    service: ServiceBody,
    #[serde(default)]
    agent: Option<AgentBody>,
    #[serde(default)]
    etag: Option<String>,
}

#[derive(Default, Deserialize)]
struct ServiceBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    environment: Option<String>,
}

#[derive(Deserialize)]
struct AgentBody {
    #[serde(default)]
    name: Option<String>,
}

/// Extracts and normalizes queries.
#[derive(Clone, Debug, Default)]
pub struct QueryTranslator {
    default_service_environment: Option<String>,
}

impl QueryTranslator {
    pub fn new(default_service_environment: Option<String>) -> Self {
        QueryTranslator {
            default_service_environment: default_service_environment.filter(|env| !env.is_empty()),
        }
    }

    pub fn translate(&self, request: &Request<Bytes>) -> Result<Query, ClassifiedError> {
        let params = query_params(request.uri().query());
        let header_etag = if_none_match(request.headers(), &params);

        let (name, environment, agent_name, etag) = match request.method() {
            &Method::GET => (
                param(&params, PARAM_SERVICE_NAME),
                param(&params, PARAM_SERVICE_ENVIRONMENT),
                param(&params, PARAM_AGENT_NAME),
                header_etag,
            ),
            &Method::POST => {
                let body = parse_body(request.body())?;
                let etag = body
                    .etag
                    .as_deref()
                    .and_then(unquote)
                    .or(header_etag);
                (
                    body.service.name.filter(|n| !n.is_empty()),
                    body.service.environment.filter(|e| !e.is_empty()),
                    body.agent.and_then(|a| a.name).filter(|n| !n.is_empty()),
                    etag,
                )
            }
            method => return Err(ClassifiedError::method_not_allowed(method)),
        };

        let name = name.ok_or_else(ClassifiedError::missing_service_name)?;
        let environment = environment.or_else(|| self.default_service_environment.clone());

        Ok(Query {
            service: Service::new(name, environment),
            agent_name,
            etag,
        })
    }
}

fn parse_body(body: &Bytes) -> Result<QueryBody, ClassifiedError> {
    if body.is_empty() {
        return Ok(QueryBody {
            service: ServiceBody::default(),
            agent: None,
            etag: None,
        });
    }
    serde_json::from_slice(body).map_err(|e| ClassifiedError::invalid_body(e.to_string()))
}

fn query_params(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// First non-empty value of `key`.
fn param(params: &[(String, String)], key: &str) -> Option<String> {
    params
        .iter()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v.clone())
}

/// The caller's conditional-match token. The header wins over the query
/// argument.
fn if_none_match(headers: &HeaderMap, params: &[(String, String)]) -> Option<String> {
    headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .and_then(unquote)
        .or_else(|| param(params, PARAM_IF_NONE_MATCH).as_deref().and_then(unquote))
}

fn unquote(token: &str) -> Option<String> {
    let token = token.trim().trim_matches('"');
    (!token.is_empty()).then(|| token.to_string())
}
