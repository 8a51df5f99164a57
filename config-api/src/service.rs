use crate::auth::Authenticator;
use crate::classify::ClassifiedError;
use crate::errors::ConfigApiError;
use crate::handler::AgentConfigHandler;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::request::Endpoint;
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use shared::http::{boxed, make_error_response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Largest request body accepted on the configuration endpoints.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct ConfigApiService {
    handler: Arc<AgentConfigHandler>,
    authenticator: Arc<dyn Authenticator>,
}

impl ConfigApiService {
    pub fn new(handler: Arc<AgentConfigHandler>, authenticator: Arc<dyn Authenticator>) -> Self {
        ConfigApiService {
            handler,
            authenticator,
        }
    }
}

impl Service<Request<Incoming>> for ConfigApiService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = ConfigApiError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(boxed(service.route(req).await)) })
    }
}

impl ConfigApiService {
    async fn route<B>(&self, request: Request<B>) -> Response<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let Some(endpoint) = Endpoint::from_path(request.uri().path()) else {
            return make_error_response(StatusCode::NOT_FOUND);
        };

        let started = Instant::now();
        let inflight = InflightGuard::acquire();
        let response = self.serve(endpoint, request).await;
        drop(inflight);
        shared::histogram!(
            REQUEST_DURATION,
            "endpoint" => endpoint.as_str(),
            "status" => response.status().as_str().to_owned(),
        )
        .record(started.elapsed().as_secs_f64());

        response
    }

    async fn serve<B>(&self, endpoint: Endpoint, request: Request<B>) -> Response<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let (parts, body) = request.into_parts();

        let authentication = match self
            .authenticator
            .authenticate(&parts.headers, endpoint)
            .await
        {
            Ok(authentication) => authentication,
            Err(err) => {
                return self
                    .handler
                    .error_response(endpoint, &ClassifiedError::authentication(&err));
            }
        };

        let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                return self
                    .handler
                    .error_response(endpoint, &ClassifiedError::invalid_body(err));
            }
        };

        self.handler
            .handle(endpoint, Request::from_parts(parts, body), &authentication)
            .await
    }
}

/// Counts a request in the in-flight gauge until dropped, so requests
/// abandoned by the client are released too.
struct InflightGuard;

impl InflightGuard {
    fn acquire() -> Self {
        shared::gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        shared::gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}
