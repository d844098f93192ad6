use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::{
    application::usecases::chunked_upload::ChunkedUploadDriver,
    domain::{
        errors::UplinkError,
        repositories::upload_records::UploadRecordRepository,
        value_objects::{
            agent_messages::{AgentCommand, AgentNotification},
            enums::{agent_states::AgentState, upload_statuses::UploadStatus},
        },
    },
};

/// Inputs an agent task reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentSignal {
    Command(AgentCommand),
    /// Connectivity came back for a registered recovery tag.
    Recovery { tag: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    Failed,
    /// Missing, or another attempt already holds it.
    Skipped,
}

/// Delivers stored records on behalf of pages that may no longer exist.
pub struct DeliveryAgent {
    store: Arc<dyn UploadRecordRepository + Send + Sync>,
    driver: Arc<ChunkedUploadDriver>,
    notifications: broadcast::Sender<AgentNotification>,
}

impl DeliveryAgent {
    pub fn new(
        store: Arc<dyn UploadRecordRepository + Send + Sync>,
        driver: Arc<ChunkedUploadDriver>,
        notifications: broadcast::Sender<AgentNotification>,
    ) -> Self {
        Self {
            store,
            driver,
            notifications,
        }
    }

    /// One record, one deferred PUT. The record is deleted before the
    /// completion notice goes out so a repeated trigger finds nothing.
    pub async fn deliver_record(&self, id: &str) -> Result<DeliveryResult, UplinkError> {
        let Some(record) = self.store.begin_attempt(id).await? else {
            debug!(record_id = %id, "delivery_agent: record missing or already in flight");
            return Ok(DeliveryResult::Skipped);
        };

        info!(
            record_id = %record.id,
            payload_len = record.payload.len(),
            retry_count = record.retry_count,
            "delivery_agent: delivering record"
        );

        match self
            .driver
            .deliver_whole(&record.remote_upload_url, record.payload.clone())
            .await
        {
            Ok(()) => {
                self.store.delete(&record.id).await?;
                info!(record_id = %record.id, "delivery_agent: record delivered");
                self.notify(AgentNotification::UploadComplete {
                    id: record.id,
                    remote_upload_id: record.remote_upload_id,
                });
                Ok(DeliveryResult::Delivered)
            }
            Err(err) => {
                warn!(record_id = %record.id, error = %err, "delivery_agent: delivery failed");
                if let Err(mark_err) = self.store.update_status(&record.id, UploadStatus::Failed).await {
                    error!(
                        record_id = %record.id,
                        error = %mark_err,
                        "delivery_agent: failed to mark record failed"
                    );
                }
                self.notify(AgentNotification::UploadFailed {
                    id: record.id,
                    error: err.to_string(),
                });
                Ok(DeliveryResult::Failed)
            }
        }
    }

    /// Drains every eligible record, oldest first, one at a time.
    pub async fn process_pending(&self) -> Result<usize, UplinkError> {
        let ids = self.store.pending_ids().await?;
        if ids.is_empty() {
            debug!("delivery_agent: nothing pending");
            return Ok(0);
        }

        info!(pending = ids.len(), "delivery_agent: processing pending records");
        let mut delivered = 0;
        for id in ids {
            match self.deliver_record(&id).await {
                Ok(DeliveryResult::Delivered) => delivered += 1,
                Ok(_) => {}
                Err(err) => {
                    error!(record_id = %id, error = %err, "delivery_agent: record could not be processed");
                }
            }
        }
        Ok(delivered)
    }

    fn notify(&self, notification: AgentNotification) {
        // No receivers just means no page is listening right now.
        if self.notifications.send(notification).is_err() {
            debug!("delivery_agent: no page subscribed to notifications");
        }
    }

    async fn process_pending_logged(&self, trigger: &str) {
        if let Err(err) = self.process_pending().await {
            error!(trigger, error = %err, "delivery_agent: pending scan failed");
        }
    }

    async fn handle(&self, signal: AgentSignal) {
        match signal {
            AgentSignal::Command(AgentCommand::StartUpload { id }) => {
                if let Err(err) = self.deliver_record(&id).await {
                    error!(record_id = %id, error = %err, "delivery_agent: start upload failed");
                }
            }
            AgentSignal::Command(AgentCommand::ProcessPending) => {
                self.process_pending_logged("command").await;
            }
            AgentSignal::Recovery { tag } => {
                info!(tag = %tag, "delivery_agent: recovery signal received");
                self.process_pending_logged("recovery").await;
            }
            AgentSignal::Command(AgentCommand::ActivateNow) => {
                debug!("delivery_agent: already active");
            }
        }
    }

    /// Agent task body: install, optionally wait for takeover, activate,
    /// drain, then serve signals until the host lets go of the sender.
    pub async fn run(
        self,
        mut signals: mpsc::Receiver<AgentSignal>,
        state: watch::Sender<AgentState>,
        must_wait: bool,
        activated: oneshot::Sender<()>,
    ) {
        // The store must be reachable for the background pathway to exist.
        if let Err(err) = self.store.pending_ids().await {
            error!(error = %err, "delivery_agent: install failed, store unavailable");
            state.send_replace(AgentState::Redundant);
            return;
        }

        if must_wait {
            state.send_replace(AgentState::Waiting);
            info!("delivery_agent: installed, waiting for previous agent to release");
            loop {
                match signals.recv().await {
                    Some(AgentSignal::Command(AgentCommand::ActivateNow)) => break,
                    Some(other) => debug!(signal = ?other, "delivery_agent: ignored while waiting"),
                    None => {
                        state.send_replace(AgentState::Redundant);
                        return;
                    }
                }
            }
        }

        state.send_replace(AgentState::Activated);
        let _ = activated.send(());
        info!("delivery_agent: activated");

        self.process_pending_logged("activation").await;

        while let Some(signal) = signals.recv().await {
            self.handle(signal).await;
        }

        state.send_replace(AgentState::Redundant);
        info!("delivery_agent: replaced, shutting down");
    }
}
