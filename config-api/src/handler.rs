use crate::auth::{Authentication, authorize_query};
use crate::classify::ClassifiedError;
use crate::config::AgentConfig;
use crate::request::{Endpoint, QueryTranslator};
use crate::response::ResponseShaper;
use agentcfg::Fetcher;
use http::{Request, Response};
use hyper::body::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Serves one agent configuration request: translate, authorize, fetch,
/// shape.
pub struct AgentConfigHandler {
    translator: QueryTranslator,
    fetcher: Arc<dyn Fetcher>,
    shaper: ResponseShaper,
    request_timeout: Duration,
}

impl AgentConfigHandler {
    pub fn new(config: &AgentConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        AgentConfigHandler {
            translator: QueryTranslator::new(config.default_service_environment.clone()),
            fetcher,
            shaper: ResponseShaper::new(config.cache.expiration(), &config.rum),
            request_timeout: config.request_timeout(),
        }
    }

    pub async fn handle(
        &self,
        endpoint: Endpoint,
        request: Request<Bytes>,
        authentication: &Authentication,
    ) -> Response<Bytes> {
        match self.process(endpoint, &request, authentication).await {
            Ok(response) => response,
            Err(err) => self.error_response(endpoint, &err),
        }
    }

    pub fn error_response(&self, endpoint: Endpoint, err: &ClassifiedError) -> Response<Bytes> {
        tracing::debug!(
            kind = err.kind.as_str(),
            status = err.status.as_u16(),
            message = %err.message,
            "agent configuration request failed"
        );
        self.shaper.error(endpoint, err)
    }

    async fn process(
        &self,
        endpoint: Endpoint,
        request: &Request<Bytes>,
        authentication: &Authentication,
    ) -> Result<Response<Bytes>, ClassifiedError> {
        let query = self.translator.translate(request)?;
        authorize_query(authentication, &query).await?;

        // Giving up here leaves the shared fetch running for other waiters.
        let result = tokio::time::timeout(self.request_timeout, self.fetcher.fetch(&query))
            .await
            .map_err(|_| ClassifiedError::timeout())?
            .map_err(|err| {
                tracing::warn!(error = %err, service = %query.service.name, "fetching agent configuration failed");
                ClassifiedError::fetch(&err, authentication.method)
            })?;

        Ok(self.shaper.success(endpoint, &query, result))
    }
}
