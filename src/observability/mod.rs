mod config;
mod layer;
mod notifier;
mod webhook;

use anyhow::Result;
use config::ObservabilityConfig;
use layer::ErrorNotifyLayer;
use notifier::{AlertSink, Notifier};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use webhook::WebhookAlertSink;

/// Installs the process-wide subscriber. Must run inside a tokio runtime when
/// an alert webhook is configured.
pub fn init_observability(component: &str) -> Result<()> {
    let mut config = ObservabilityConfig::from_env(component);

    let notify_layer = match config.alert.as_ref() {
        Some(alert) => match WebhookAlertSink::new(alert.webhook_url.clone()) {
            Ok(sink) => {
                let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(sink)];
                Some(
                    ErrorNotifyLayer::new(
                        Notifier::new(sinks),
                        config.service_context.clone(),
                        alert.min_level,
                    )
                    .with_filter(LevelFilter::from_level(alert.min_level)),
                )
            }
            Err(err) => {
                config.warnings.push(err.to_string());
                None
            }
        },
        None => None,
    };
    let alerts_enabled = notify_layer.is_some();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Local time so `TZ` shows up as an offset in the log lines.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(notify_layer)
        .with(env_filter)
        .try_init()?;

    let context = &config.service_context;
    for warning in &config.warnings {
        warn!(
            service = %context.service_name,
            environment = %context.environment,
            component = %context.component,
            warning = %warning,
            "observability: config warning"
        );
    }

    info!(
        service = %context.service_name,
        environment = %context.environment,
        component = %context.component,
        alerts_enabled,
        "observability: initialised"
    );

    Ok(())
}
