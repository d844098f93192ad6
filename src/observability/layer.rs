use super::config::ServiceContext;
use super::notifier::{AlertEvent, Notifier, SpanSummary};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

const REDACTED: &str = "[REDACTED]";

/// Field-name fragments whose values never leave the process: relay stream
/// keys, signed upload URLs and bearer tokens.
const SENSITIVE_FRAGMENTS: [&str; 7] = [
    "stream_key",
    "token",
    "secret",
    "password",
    "upload_url",
    "authorization",
    "webhook",
];

#[derive(Clone)]
pub(crate) struct ErrorNotifyLayer {
    notifier: Notifier,
    service_context: ServiceContext,
    min_level: Level,
}

impl ErrorNotifyLayer {
    pub(crate) fn new(notifier: Notifier, service_context: ServiceContext, min_level: Level) -> Self {
        Self {
            notifier,
            service_context,
            min_level,
        }
    }
}

#[derive(Default)]
struct FieldMapVisitor {
    values: BTreeMap<String, String>,
}

impl FieldMapVisitor {
    fn insert(&mut self, field: &Field, value: String) {
        self.values
            .insert(field.name().to_string(), redact(field.name(), value));
    }
}

impl Visit for FieldMapVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.to_string());
    }
}

#[derive(Default)]
struct SpanFieldMap {
    values: BTreeMap<String, String>,
}

impl<S> Layer<S> for ErrorNotifyLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: Context<'_, S>,
    ) {
        let mut visitor = FieldMapVisitor::default();
        attrs.record(&mut visitor);
        if visitor.values.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFieldMap {
                values: visitor.values,
            });
        }
    }

    fn on_record(
        &self,
        id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        ctx: Context<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut visitor = FieldMapVisitor::default();
        values.record(&mut visitor);
        if visitor.values.is_empty() {
            return;
        }

        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanFieldMap>() {
            Some(existing) => existing.values.extend(visitor.values),
            None => extensions.insert(SpanFieldMap {
                values: visitor.values,
            }),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.min_level {
            return;
        }

        let mut visitor = FieldMapVisitor::default();
        event.record(&mut visitor);
        let message = visitor
            .values
            .remove("message")
            .map(|raw| unquote_debug_string(&raw));

        let spans = ctx
            .event_span(event)
            .map(|span| {
                span.scope()
                    .from_root()
                    .map(|s| SpanSummary {
                        name: s.metadata().name().to_string(),
                        fields: s
                            .extensions()
                            .get::<SpanFieldMap>()
                            .map(|m| m.values.clone())
                            .unwrap_or_default(),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        self.notifier.try_notify(AlertEvent {
            level: *metadata.level(),
            timestamp: Utc::now(),
            service_name: self.service_context.service_name.clone(),
            environment: self.service_context.environment.clone(),
            component: self.service_context.component.clone(),
            target: metadata.target().to_string(),
            file: metadata.file().map(str::to_string),
            line: metadata.line(),
            message,
            fields: visitor.values,
            spans,
        });
    }
}

fn unquote_debug_string(input: &str) -> String {
    let trimmed = input.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

pub(crate) fn redact(field_name: &str, value: String) -> String {
    if is_sensitive_key(field_name) {
        return REDACTED.to_string();
    }
    value
}

fn is_sensitive_key(field_name: &str) -> bool {
    let field = field_name.to_ascii_lowercase();
    SENSITIVE_FRAGMENTS
        .iter()
        .any(|fragment| field.contains(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::notifier::AlertSink;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    struct CapturingSink {
        events: Arc<Mutex<Vec<AlertEvent>>>,
    }

    #[async_trait]
    impl AlertSink for CapturingSink {
        async fn send(&self, event: &AlertEvent) -> anyhow::Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }

        fn sink_name(&self) -> &'static str {
            "capturing"
        }
    }

    #[test]
    fn secret_looking_fields_are_redacted() {
        assert_eq!(redact("stream_key", "sk_live_1".into()), REDACTED);
        assert_eq!(redact("remote_upload_url", "https://x/?sig=1".into()), REDACTED);
        assert_eq!(redact("Authorization", "Bearer t".into()), REDACTED);
        assert_eq!(redact("record_id", "1700-abc".into()), "1700-abc");
    }

    #[test]
    fn debug_quotes_are_stripped() {
        assert_eq!(unquote_debug_string("\"relay closed\""), "relay closed");
        assert_eq!(unquote_debug_string("plain"), "plain");
    }

    #[tokio::test]
    async fn errors_are_forwarded_and_warnings_are_not() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let notifier = Notifier::new(vec![Arc::new(CapturingSink {
            events: Arc::clone(&events),
        })]);
        let layer = ErrorNotifyLayer::new(
            notifier,
            ServiceContext {
                service_name: "uplink".into(),
                environment: "test".into(),
                component: "agent".into(),
            },
            Level::ERROR,
        );
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("live_session", stream_id = "st_9");
            let _guard = span.enter();
            tracing::warn!("live_relay: frame dropped");
            tracing::error!(stream_key = "sk_secret", "live_relay: relay lost");
        });

        for _ in 0..50 {
            if !events.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let events = events.lock();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.message.as_deref(), Some("live_relay: relay lost"));
        assert_eq!(event.fields.get("stream_key").map(String::as_str), Some(REDACTED));
        assert_eq!(event.spans[0].name, "live_session");
        assert_eq!(
            event.spans[0].fields.get("stream_id").map(String::as_str),
            Some("st_9")
        );
    }
}
