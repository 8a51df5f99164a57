//! HTTP client for the upstream configuration store.
//!
//! The store exposes two endpoints:
//!
//! - `GET /api/status` reporting `{"version": {"number": "X.Y.Z"}}`
//! - `POST /api/apm/settings/agent-configuration/search` taking
//!   `{"service": {"name": .., "environment": ..}, "etag": ""}` and answering
//!   `{"_id": .., "_source": {"settings": {..}, "etag": .., "agent_name": ..}}`,
//!   or 404 when no document matches.

use crate::config::StoreConfig;
use crate::store::{ConfigStore, FetchError};
use crate::types::{Service, StoreDocument};
use crate::version::Version;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::OnceCell;
use url::Url;

/// Oldest store version that understands the search endpoint.
pub const MIN_STORE_VERSION: Version = Version::new(7, 5, 0);

const STATUS_PATH: &str = "/api/status";
const SEARCH_PATH: &str = "/api/apm/settings/agent-configuration/search";

#[derive(Clone, Debug)]
enum Credentials {
    Anonymous,
    Basic {
        username: String,
        password: Option<String>,
    },
    ApiKey(String),
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    service: &'a Service,
    etag: &'a str,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "_source")]
    source: StoreDocument,
}

#[derive(Deserialize)]
struct StatusResponse {
    version: StatusVersion,
}

#[derive(Deserialize)]
struct StatusVersion {
    number: String,
}

pub struct HttpConfigStore {
    client: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    // Only a successfully read version is kept; failures are retried on the next query.
    version: OnceCell<Version>,
}

impl HttpConfigStore {
    pub fn new(config: &StoreConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let credentials = match (&config.username, &config.api_key) {
            (Some(username), _) => Credentials::Basic {
                username: username.clone(),
                password: config.password.clone(),
            },
            (None, Some(api_key)) => Credentials::ApiKey(api_key.clone()),
            (None, None) => Credentials::Anonymous,
        };

        Ok(HttpConfigStore {
            client,
            base_url: config.url.clone(),
            credentials,
            version: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        // Keep any base path the store is mounted under.
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
            .map_err(|e| FetchError::SendFailed(format!("invalid store url: {e}")))
    }

    fn with_credentials(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::Anonymous => builder,
            Credentials::Basic { username, password } => {
                builder.basic_auth(username, password.as_ref())
            }
            Credentials::ApiKey(key) => builder.header("Authorization", format!("ApiKey {key}")),
        }
    }

    async fn store_version(&self) -> Result<Version, FetchError> {
        self.version
            .get_or_try_init(|| self.fetch_version())
            .await
            .copied()
    }

    async fn fetch_version(&self) -> Result<Version, FetchError> {
        let url = self.endpoint(STATUS_PATH)?;
        let response = self
            .with_credentials(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            return Err(classify_status(status, detail));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| FetchError::SendFailed(format!("invalid status response: {e}")))?;

        let version = body
            .version
            .number
            .parse()
            .map_err(|e: crate::version::InvalidVersion| FetchError::SendFailed(e.to_string()))?;
        tracing::debug!(%version, "read configuration store version");
        Ok(version)
    }
}

#[async_trait]
impl ConfigStore for HttpConfigStore {
    async fn query(&self, service: &Service) -> Result<Option<StoreDocument>, FetchError> {
        let version = self.store_version().await?;
        if version < MIN_STORE_VERSION {
            return Err(FetchError::VersionIncompatible {
                minimum: MIN_STORE_VERSION,
                configured: version,
            });
        }

        let url = self.endpoint(SEARCH_PATH)?;
        let response = self
            .with_credentials(self.client.post(url))
            .header("kbn-xsrf", "true")
            .json(&SearchRequest { service, etag: "" })
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: SearchResponse = response.json().await.map_err(|e| {
                    FetchError::SendFailed(format!("invalid search response: {e}"))
                })?;
                Ok(Some(body.source))
            }
            status => {
                let detail = error_detail(response).await;
                Err(classify_status(status, detail))
            }
        }
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    FetchError::Unreachable(err.to_string())
}

fn classify_status(status: StatusCode, detail: String) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Unauthorized(detail),
        _ => FetchError::SendFailed(detail),
    }
}

/// Extracts a short error description from a failed store response.
async fn error_detail(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    detail_from_body(status, &body)
}

fn detail_from_body(status: StatusCode, body: &str) -> String {
    if let Ok(JsonValue::Object(fields)) = serde_json::from_str::<JsonValue>(body) {
        for key in ["error", "message"] {
            if let Some(JsonValue::String(detail)) = fields.get(key) {
                return detail.clone();
            }
        }
    }

    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or(status.as_str())
            .to_string()
    } else {
        body.to_string()
    }
}
