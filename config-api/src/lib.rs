//! HTTP API through which agents poll their central configuration.

pub mod auth;
pub mod classify;
pub mod config;
pub mod errors;
pub mod handler;
pub mod metrics_defs;
pub mod request;
pub mod response;
pub mod service;
#[cfg(test)]
mod testutils;

use agentcfg::{CachingFetcher, DisabledFetcher, Fetcher, HttpConfigStore};
use auth::{Authenticator, ConfigAuthenticator};
use config::{AgentConfig, Config, Listener};
use handler::AgentConfigHandler;
use service::ConfigApiService;
use shared::admin_service::AdminService;
use shared::http::{run_http_service, serve_http_service};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

pub use errors::ConfigApiError;

pub async fn run(config: Config) -> Result<(), ConfigApiError> {
    config.validate()?;
    let fetcher = build_fetcher(&config.agent_config)?;
    let authenticator = Arc::new(ConfigAuthenticator::new(&config.auth));
    serve(config, fetcher, authenticator).await
}

/// Builds the fetcher for the configured store. Without a store every fetch
/// fails with [`agentcfg::FetchError::StoreDisabled`].
pub fn build_fetcher(config: &AgentConfig) -> Result<Arc<dyn Fetcher>, ConfigApiError> {
    let Some(store_config) = &config.store else {
        tracing::warn!("no configuration store configured, agent configuration is unavailable");
        return Ok(Arc::new(DisabledFetcher));
    };
    let store = HttpConfigStore::new(store_config)?;
    tracing::info!(url = %store_config.url, "using configuration store");
    Ok(Arc::new(CachingFetcher::new(
        Arc::new(store),
        config.cache.expiration(),
    )))
}

/// Serves the config API and the admin listener until either fails.
pub async fn serve(
    config: Config,
    fetcher: Arc<dyn Fetcher>,
    authenticator: Arc<dyn Authenticator>,
) -> Result<(), ConfigApiError> {
    let ready = Arc::new(AtomicBool::new(false));

    let handler = Arc::new(AgentConfigHandler::new(&config.agent_config, fetcher));
    let api_service = ConfigApiService::new(handler, authenticator);

    let admin_ready = ready.clone();
    let admin_service =
        AdminService::<_, ConfigApiError>::new(move || admin_ready.load(Ordering::Relaxed));
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    let api_task = serve_api(&config.listener, api_service, ready);

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}

/// Binds the API listener and flags readiness once the socket is bound.
async fn serve_api(
    listener: &Listener,
    service: ConfigApiService,
    ready: Arc<AtomicBool>,
) -> Result<(), ConfigApiError> {
    let tcp_listener = TcpListener::bind(format!("{}:{}", listener.host, listener.port)).await?;
    tracing::info!(host = %listener.host, port = listener.port, "config API listening");
    ready.store(true, Ordering::Relaxed);
    serve_http_service(tcp_listener, service).await
}
