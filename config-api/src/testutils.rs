use crate::auth::{Action, AuthorizationError, Authorizer, Resource};
use agentcfg::{FetchError, FetchResult, Fetcher, Query, Settings};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

/// A fetched document holding a single `sampling_rate` setting.
pub fn document(etag: &str, agent_name: Option<&str>) -> FetchResult {
    FetchResult {
        settings: Settings::from([("sampling_rate".to_string(), "0.5".to_string())]),
        etag: etag.to_string(),
        agent_name: agent_name.map(str::to_string),
    }
}

/// Answers every fetch with the same outcome and records the queries.
pub struct MockFetcher {
    response: Result<FetchResult, FetchError>,
    delay: Option<Duration>,
    queries: Mutex<Vec<Query>>,
}

impl MockFetcher {
    pub fn new(response: Result<FetchResult, FetchError>) -> Self {
        MockFetcher {
            response,
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, query: &Query) -> Result<FetchResult, FetchError> {
        self.queries.lock().push(query.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone()
    }
}

pub struct StaticAuthorizer(pub Result<(), AuthorizationError>);

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(
        &self,
        _action: Action,
        _resource: &Resource,
    ) -> Result<(), AuthorizationError> {
        self.0.clone()
    }
}
