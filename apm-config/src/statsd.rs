use crate::config::MetricsConfig;
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};

const METRICS_PREFIX: &str = "apm_config";

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("could not create statsd exporter: {0}")]
    Exporter(#[from] StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderAlreadySet,
}

/// Exports metrics to StatsD. Without this, metrics are discarded.
pub fn init(config: &MetricsConfig) -> Result<(), MetricsError> {
    let recorder =
        StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port).build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::RecorderAlreadySet)?;

    shared::metrics_defs::describe_all(agentcfg::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(config_api::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "exporting metrics to statsd"
    );
    Ok(())
}
