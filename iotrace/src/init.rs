use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_util::MetricKindMask;
use std::net::SocketAddr;
use std::time::Duration;

pub(crate) fn setup_logging() {
    tracing_subscriber::fmt::init();
}

/// Installs the Prometheus recorder. Without a listen address metrics are
/// still recorded but not exported.
pub(crate) fn setup_metrics(listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let mut builder = PrometheusBuilder::new();
    if let Some(addr) = listen {
        builder = builder.with_http_listener(addr);
    }
    builder
        .idle_timeout(MetricKindMask::COUNTER, Some(Duration::from_secs(300)))
        .install()
        .context("failed to install Prometheus recorder")?;

    metrics::describe_counter!("iotrace_events_recorded", "I/O events stored in a log");
    metrics::describe_counter!(
        "iotrace_events_dropped",
        "I/O events dropped, by reason (unmonitored, stopped, unknown_device)"
    );

    Ok(())
}
