//! Observability: logging, distributed tracing and metrics.

use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the observability stack.
///
/// `RUST_LOG` wins over the configured log level when set.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // OpenTelemetry export only when an endpoint is configured
    let telemetry_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config()
                        .with_resource(opentelemetry_sdk::Resource::new(vec![
                            opentelemetry::KeyValue::new("service.name", service_name.to_string()),
                        ])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let json_layer = config
        .json_logging
        .then(|| tracing_subscriber::fmt::layer().json());
    let compact_layer = (!config.json_logging)
        .then(|| tracing_subscriber::fmt::layer().compact().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()?;

    Ok(())
}

/// Shutdown OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Metrics registry and helpers.
pub mod metrics {
    use metrics::{counter, describe_counter};
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
    use std::sync::OnceLock;

    static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

    /// Install the Prometheus recorder and describe the access metrics.
    pub fn init_metrics() -> anyhow::Result<()> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        let _ = PROMETHEUS.set(handle);
        register_metrics();
        Ok(())
    }

    /// Render all metrics in Prometheus text format.
    pub fn render() -> String {
        PROMETHEUS.get().map(|h| h.render()).unwrap_or_default()
    }

    /// Register all metric descriptions.
    pub fn register_metrics() {
        describe_counter!(
            "access_decisions_total",
            "Guard decisions by domain and outcome"
        );
        describe_counter!(
            "access_membership_lookups_total",
            "Membership lookups by domain and source (cache or store)"
        );
        describe_counter!(
            "access_global_admin_bypass_total",
            "Synthetic memberships issued to instance superusers"
        );
        describe_counter!(
            "access_denials_total",
            "Audited denials by reason code"
        );
        describe_counter!(
            "access_errors_total",
            "Errors raised by the access resolver"
        );
    }

    /// Record one guard decision.
    pub fn record_decision(domain: &'static str, granted: bool) {
        let outcome = if granted { "granted" } else { "denied" };
        counter!("access_decisions_total", "domain" => domain, "outcome" => outcome).increment(1);
    }

    /// Record where a membership lookup was answered from.
    pub fn record_lookup(domain: &'static str, source: &'static str) {
        counter!("access_membership_lookups_total", "domain" => domain, "source" => source)
            .increment(1);
    }

    /// Record a synthetic superuser membership.
    pub fn record_bypass(domain: &'static str) {
        counter!("access_global_admin_bypass_total", "domain" => domain).increment(1);
    }

    /// Record an audited denial.
    pub fn record_denial(reason: &'static str) {
        counter!("access_denials_total", "reason" => reason).increment(1);
    }
}
