//! Renders fetch results and classified errors as HTTP responses.

use crate::classify::ClassifiedError;
use crate::config::RumConfig;
use crate::request::Endpoint;
use agentcfg::{FetchResult, Query, Settings};
use http::header::{ACCESS_CONTROL_EXPOSE_HEADERS, CACHE_CONTROL, ETAG};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use hyper::body::Bytes;
use serde::Serialize;
use shared::http::{empty_response, json_response, make_error_response};
use std::collections::HashSet;
use std::time::Duration;

/// Agents should retry failed requests no sooner than this.
pub const ERROR_CACHE_CONTROL: &str = "max-age=300, must-revalidate";

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

pub struct ResponseShaper {
    success_cache_control: HeaderValue,
    rum_allow_agents: HashSet<String>,
    /// Empty means every setting passes.
    rum_allow_settings: HashSet<String>,
}

impl ResponseShaper {
    pub fn new(expiration: Duration, rum: &RumConfig) -> Self {
        let cache_control = format!("max-age={}, must-revalidate", expiration.as_secs());
        ResponseShaper {
            success_cache_control: HeaderValue::from_str(&cache_control)
                .unwrap_or_else(|_| HeaderValue::from_static(ERROR_CACHE_CONTROL)),
            rum_allow_agents: rum.allow_agents.iter().cloned().collect(),
            rum_allow_settings: rum.allow_settings.iter().cloned().collect(),
        }
    }

    /// 304 when the caller already holds the result's etag, otherwise 200
    /// with the (possibly filtered) settings.
    pub fn success(&self, endpoint: Endpoint, query: &Query, result: FetchResult) -> Response<Bytes> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, self.success_cache_control.clone());
        match HeaderValue::from_str(&format!("\"{}\"", result.etag)) {
            Ok(etag) => {
                headers.insert(ETAG, etag);
            }
            Err(_) => {
                tracing::warn!(etag = %result.etag, "store returned an etag that is not a valid header value");
            }
        }
        expose_etag(endpoint, &mut headers);

        let mut response = if query.etag.as_deref() == Some(result.etag.as_str()) {
            empty_response(StatusCode::NOT_MODIFIED)
        } else {
            let settings = match endpoint {
                Endpoint::Backend => result.settings,
                Endpoint::Rum => self.filter_rum(query, result),
            };
            match json_response(StatusCode::OK, &settings) {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(error = %err, "failed to serialize settings");
                    return make_error_response(StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
        };
        response.headers_mut().extend(headers);
        response
    }

    pub fn error(&self, endpoint: Endpoint, err: &ClassifiedError) -> Response<Bytes> {
        let mut response = json_response(err.status, &ErrorBody { error: &err.message })
            .unwrap_or_else(|_| make_error_response(err.status));
        let headers = response.headers_mut();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(ERROR_CACHE_CONTROL));
        expose_etag(endpoint, headers);
        response
    }

    /// Browser agents only see allowed settings, and nothing at all when
    /// the configuration targets another agent.
    fn filter_rum(&self, query: &Query, result: FetchResult) -> Settings {
        let agent = result.agent_name.as_ref().or(query.agent_name.as_ref());
        if let Some(agent) = agent {
            if !self.rum_allow_agents.contains(agent) {
                return Settings::new();
            }
        }
        if self.rum_allow_settings.is_empty() {
            return result.settings;
        }
        result
            .settings
            .into_iter()
            .filter(|(key, _)| self.rum_allow_settings.contains(key))
            .collect()
    }
}

/// Browsers only hand the `Etag` header to RUM agents when it is exposed.
fn expose_etag(endpoint: Endpoint, headers: &mut HeaderMap) {
    if endpoint == Endpoint::Rum {
        headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("Etag"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentcfg::Service;

    fn shaper() -> ResponseShaper {
        ResponseShaper::new(Duration::from_secs(4), &RumConfig::default())
    }

    fn query(agent: Option<&str>, etag: Option<&str>) -> Query {
        Query {
            service: Service::new("opbeans", None),
            agent_name: agent.map(str::to_string),
            etag: etag.map(str::to_string),
        }
    }

    fn result(agent: Option<&str>) -> FetchResult {
        FetchResult {
            settings: Settings::from([
                ("transaction_sample_rate".to_string(), "0.5".to_string()),
                ("capture_body".to_string(), "all".to_string()),
            ]),
            etag: "123".to_string(),
            agent_name: agent.map(str::to_string),
        }
    }

    fn body_json(response: &Response<Bytes>) -> serde_json::Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[test]
    fn test_success() {
        let response = shaper().success(Endpoint::Backend, &query(None, None), result(None));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ETAG], "\"123\"");
        assert_eq!(response.headers()[CACHE_CONTROL], "max-age=4, must-revalidate");
        assert!(!response.headers().contains_key(ACCESS_CONTROL_EXPOSE_HEADERS));
        assert_eq!(
            body_json(&response),
            serde_json::json!({"transaction_sample_rate": "0.5", "capture_body": "all"})
        );
    }

    #[test]
    fn test_not_modified() {
        let response = shaper().success(Endpoint::Backend, &query(None, Some("123")), result(None));
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.body().is_empty());
        assert_eq!(response.headers()[ETAG], "\"123\"");
        assert_eq!(response.headers()[CACHE_CONTROL], "max-age=4, must-revalidate");
        assert!(!response.headers().contains_key(http::header::CONTENT_TYPE));

        let response = shaper().success(Endpoint::Rum, &query(None, Some("123")), result(None));
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[ACCESS_CONTROL_EXPOSE_HEADERS], "Etag");
    }

    #[test]
    fn test_not_found_result() {
        let response = shaper().success(
            Endpoint::Backend,
            &query(None, None),
            FetchResult::not_found(),
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ETAG], "\"-\"");
        assert_eq!(body_json(&response), serde_json::json!({}));

        let response = shaper().success(
            Endpoint::Backend,
            &query(None, Some("-")),
            FetchResult::not_found(),
        );
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[test]
    fn test_rum_filtering() {
        let shaper = shaper();

        let response = shaper.success(Endpoint::Rum, &query(None, None), result(Some("node-js")));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(&response), serde_json::json!({}));
        assert_eq!(response.headers()[ETAG], "\"123\"");
        assert_eq!(response.headers()[ACCESS_CONTROL_EXPOSE_HEADERS], "Etag");

        let response = shaper.success(Endpoint::Rum, &query(None, None), result(Some("rum-js")));
        assert_eq!(
            body_json(&response),
            serde_json::json!({"transaction_sample_rate": "0.5"})
        );

        let response = shaper.success(Endpoint::Rum, &query(Some("java"), None), result(None));
        assert_eq!(body_json(&response), serde_json::json!({}));

        let response = shaper.success(Endpoint::Rum, &query(None, None), result(None));
        assert_eq!(
            body_json(&response),
            serde_json::json!({"transaction_sample_rate": "0.5"})
        );
    }

    #[test]
    fn test_rum_all_settings_when_unrestricted() {
        let rum = RumConfig {
            allow_agents: vec!["rum-js".into()],
            allow_settings: vec![],
        };
        let shaper = ResponseShaper::new(Duration::from_secs(30), &rum);
        let response = shaper.success(Endpoint::Rum, &query(Some("rum-js"), None), result(None));
        assert_eq!(
            body_json(&response),
            serde_json::json!({"transaction_sample_rate": "0.5", "capture_body": "all"})
        );
    }

    #[test]
    fn test_error() {
        let response = shaper().error(Endpoint::Backend, &ClassifiedError::missing_service_name());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CACHE_CONTROL], ERROR_CACHE_CONTROL);
        assert!(!response.headers().contains_key(ACCESS_CONTROL_EXPOSE_HEADERS));
        assert_eq!(
            response.headers()[http::header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(
            body_json(&response),
            serde_json::json!({"error": "service.name is required"})
        );
    }

    #[test]
    fn test_rum_error_exposes_etag() {
        let response = shaper().error(Endpoint::Rum, &ClassifiedError::timeout());
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[CACHE_CONTROL], ERROR_CACHE_CONTROL);
        assert_eq!(response.headers()[ACCESS_CONTROL_EXPOSE_HEADERS], "Etag");
    }
}
