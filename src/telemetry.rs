// src/telemetry.rs
//! Logging and metrics setup.
//!
//! - tracing: `EnvFilter` behind a reload layer, so `[logging].level` can be
//!   re-applied on config reload. `RUST_LOG`, when set, wins over config.
//! - metrics: Prometheus recorder, installed with or without an HTTP listener;
//!   descriptions are registered right after the recorder so they reach it.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use crate::config::LoggingConfig;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter `{0}`")]
    Filter(String),
    #[error("tracing already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
    #[error("reloading log filter: {0}")]
    Reload(#[from] reload::Error),
    #[error("metrics listen address `{0}` is invalid")]
    ListenAddr(String),
    #[error("installing prometheus exporter: {0}")]
    Exporter(#[from] metrics_exporter_prometheus::BuildError),
}

fn build_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        if let Ok(f) = EnvFilter::try_from_default_env() {
            return Ok(f);
        }
    }
    let level = if level.trim().is_empty() { "info" } else { level.trim() };
    EnvFilter::try_new(level).map_err(|_| TelemetryError::Filter(level.to_string()))
}

/// Install the global subscriber: compact or JSON lines to stdout.
pub fn init_tracing(cfg: &LoggingConfig) -> Result<(), TelemetryError> {
    let (filter, handle) = reload::Layer::new(build_filter(&cfg.level)?);
    let registry = tracing_subscriber::registry().with(filter);
    if cfg.json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()?;
    } else {
        registry.with(fmt::layer().compact()).try_init()?;
    }
    let _ = FILTER_HANDLE.set(handle);
    Ok(())
}

/// Swap the active level. A no-op before `init_tracing` (e.g. in tests).
pub fn apply_log_level(cfg: &LoggingConfig) -> Result<(), TelemetryError> {
    let Some(handle) = FILTER_HANDLE.get() else {
        return Ok(());
    };
    handle.reload(build_filter(&cfg.level)?)?;
    Ok(())
}

/// The active log filter, once `init_tracing` has run.
pub fn active_log_filter() -> Option<String> {
    FILTER_HANDLE.get()?.with_current(|f| f.to_string()).ok()
}

/// Register metric descriptions with the installed recorder. Descriptions
/// sent before a recorder is installed are lost.
pub fn describe_metrics() {
    describe_counter!("pulsewire_ticks_total", "Poll timer firings per source.");
    describe_counter!(
        "pulsewire_ticks_missed_total",
        "Ticks skipped because the previous pass was still running."
    );
    describe_counter!("pulsewire_fetch_errors_total", "Passes aborted by fetch errors.");
    describe_counter!("pulsewire_parse_errors_total", "Passes aborted by parse errors.");
    describe_counter!("pulsewire_messages_total", "Messages produced by normalization.");
    describe_counter!("pulsewire_dedupe_hits_total", "Messages suppressed as duplicates.");
    describe_counter!("pulsewire_dedupe_errors_total", "Dedupe store failures.");
    describe_counter!("pulsewire_rate_limited_total", "Messages dropped by the push budget.");
    describe_counter!("pulsewire_pushed_total", "Notifications delivered.");
    describe_counter!("pulsewire_push_errors_total", "Notification delivery failures.");
    describe_histogram!("pulsewire_pass_ms", Unit::Milliseconds, "Duration of one pass.");
    describe_gauge!("pulsewire_generation", "Id of the running worker generation.");
}

/// Serve `/metrics` on `listen`. Must run inside the tokio runtime.
pub fn install_metrics_exporter(listen: &str) -> Result<(), TelemetryError> {
    let addr: SocketAddr = listen
        .trim()
        .parse()
        .map_err(|_| TelemetryError::ListenAddr(listen.to_string()))?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    Ok(())
}

/// Install the recorder without a listener; the handle renders the
/// exposition text on demand.
pub fn install_metrics_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}
