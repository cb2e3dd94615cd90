use std::{
    env,
    net::{AddrParseError, SocketAddr},
    sync::Arc,
};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::hydrate_env_file;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_EXPORTER: OnceCell<MetricsExporter> = OnceCell::new();

const DEFAULT_LOG_FILTER: &str = "info";

/// Shared observability options for binaries.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
}

impl TelemetryConfig {
    /// Reads `<PREFIX>_LOG_FILTER` and `<PREFIX>_METRICS_ADDRESS`; blank or
    /// missing values fall back to defaults.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let prefix = prefix.trim().to_ascii_uppercase();
        let read = |suffix: &str| {
            env::var(format!("{prefix}_{suffix}"))
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            log_filter: read("LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            metrics_address: read("METRICS_ADDRESS"),
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }
}

/// Where the Prometheus exposition is served from.
#[derive(Clone)]
enum MetricsExporter {
    /// The exporter owns an HTTP listener; scrapes go there.
    Listener(SocketAddr),
    /// No listener; the embedding binary renders on demand.
    Handle(Arc<PrometheusHandle>),
}

/// Guard returned after telemetry initialization.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: MetricsExporter,
}

impl TelemetryGuard {
    /// Prometheus text exposition, or `None` when an HTTP listener serves it.
    pub fn render_metrics(&self) -> Option<String> {
        match &self.metrics {
            MetricsExporter::Handle(handle) => Some(handle.render()),
            MetricsExporter::Listener(_) => None,
        }
    }

    pub fn metrics_listener(&self) -> Option<SocketAddr> {
        match self.metrics {
            MetricsExporter::Listener(addr) => Some(addr),
            MetricsExporter::Handle(_) => None,
        }
    }
}

/// Installs the tracing subscriber and the metrics recorder. Both are process
/// globals, so later calls reuse whatever the first call installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = install_metrics(config)?;

    Ok(TelemetryGuard { metrics })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

fn install_metrics(config: &TelemetryConfig) -> Result<MetricsExporter, TelemetryError> {
    METRICS_EXPORTER
        .get_or_try_init(|| match config.metrics_address() {
            Some(addr) => {
                let socket: SocketAddr = addr.parse().map_err(|err: AddrParseError| {
                    TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
                })?;
                // spawns onto the ambient tokio runtime, or a background thread without one
                PrometheusBuilder::new()
                    .with_http_listener(socket)
                    .install()
                    .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
                Ok(MetricsExporter::Listener(socket))
            }
            None => PrometheusBuilder::new()
                .install_recorder()
                .map(|handle| MetricsExporter::Handle(Arc::new(handle)))
                .map_err(|err| TelemetryError::Metrics(err.to_string())),
        })
        .cloned()
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}
