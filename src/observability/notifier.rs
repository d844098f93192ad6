use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, warn};

const QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub(crate) struct SpanSummary {
    pub(crate) name: String,
    pub(crate) fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub(crate) struct AlertEvent {
    pub(crate) level: Level,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
    pub(crate) target: String,
    pub(crate) file: Option<String>,
    pub(crate) line: Option<u32>,
    pub(crate) message: Option<String>,
    pub(crate) fields: BTreeMap<String, String>,
    pub(crate) spans: Vec<SpanSummary>,
}

#[async_trait]
pub(crate) trait AlertSink: Send + Sync {
    async fn send(&self, event: &AlertEvent) -> Result<()>;
    fn sink_name(&self) -> &'static str;
}

/// Non-blocking front of the alert sinks. Events are dropped rather than
/// stalling the logging call site.
#[derive(Clone)]
pub(crate) struct Notifier {
    tx: mpsc::Sender<AlertEvent>,
}

impl Notifier {
    pub(crate) fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for sink in &sinks {
                    if let Err(error) = sink.send(&event).await {
                        // Logged below the alert threshold so a broken sink
                        // cannot feed itself.
                        warn!(sink = sink.sink_name(), error = %error, "observability: alert sink failed");
                    }
                }
            }
        });

        Self { tx }
    }

    pub(crate) fn try_notify(&self, event: AlertEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("observability: alert queue full; dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("observability: alert queue closed; dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct RecordingSink {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, event: &AlertEvent) -> Result<()> {
            self.seen
                .lock()
                .push(event.message.clone().unwrap_or_default());
            Ok(())
        }

        fn sink_name(&self) -> &'static str {
            "recording"
        }
    }

    fn event(message: &str) -> AlertEvent {
        AlertEvent {
            level: Level::ERROR,
            timestamp: Utc::now(),
            service_name: "uplink".into(),
            environment: "test".into(),
            component: "agent".into(),
            target: "stream_uplink".into(),
            file: None,
            line: None,
            message: Some(message.into()),
            fields: BTreeMap::new(),
            spans: Vec::new(),
        }
    }

    #[tokio::test]
    async fn forwards_events_to_every_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let notifier = Notifier::new(vec![Arc::new(RecordingSink {
            seen: Arc::clone(&seen),
        })]);

        notifier.try_notify(event("store unavailable"));

        for _ in 0..50 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.lock().as_slice(), ["store unavailable".to_string()]);
    }
}
