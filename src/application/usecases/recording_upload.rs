use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    application::usecases::{
        agent_bridge::AgentBridge,
        chunked_upload::{ChunkUploadSession, ChunkedUploadDriver, SessionOutcome},
    },
    domain::{
        errors::UplinkError,
        repositories::{media_provider::MediaProvider, upload_records::UploadRecordRepository},
        value_objects::{enums::upload_statuses::UploadStatus, media_provider::SignedUpload},
    },
};

/// Where a finished recording ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResolution {
    /// Bytes are with the remote service.
    Delivered { upload_id: String },
    /// Persisted and handed to the active agent.
    HandedToAgent { record_id: String, upload_id: String },
    /// Persisted; no agent was ready, it will be picked up on activation or
    /// recovery.
    Queued { record_id: String, upload_id: String },
}

/// One recording being uploaded while it is still captured.
pub struct RecordingUpload {
    upload: SignedUpload,
    session: ChunkUploadSession,
}

impl RecordingUpload {
    pub fn upload_id(&self) -> &str {
        &self.upload.upload_id
    }

    pub fn push_fragment(&mut self, fragment: &[u8]) {
        self.session.push_fragment(fragment);
    }

    pub fn session(&self) -> &ChunkUploadSession {
        &self.session
    }
}

/// Page-side orchestration of a recording's delivery: progressive first,
/// the durable queue and the agent when that fails or the page goes away.
pub struct RecordingUploader {
    provider: Arc<dyn MediaProvider + Send + Sync>,
    driver: Arc<ChunkedUploadDriver>,
    /// `None` when the store could not be opened; recordings then fall back
    /// to in-page delivery only.
    store: Option<Arc<dyn UploadRecordRepository + Send + Sync>>,
}

impl RecordingUploader {
    pub fn new(
        provider: Arc<dyn MediaProvider + Send + Sync>,
        driver: Arc<ChunkedUploadDriver>,
        store: Option<Arc<dyn UploadRecordRepository + Send + Sync>>,
    ) -> Self {
        Self {
            provider,
            driver,
            store,
        }
    }

    pub async fn begin(&self) -> Result<RecordingUpload, UplinkError> {
        let upload = self.provider.create_upload().await?;
        info!(upload_id = %upload.upload_id, "recording_upload: signed upload issued");
        let session = self.driver.start_session(upload.upload_url.clone());
        Ok(RecordingUpload { upload, session })
    }

    /// Capture stopped: finalize the progressive upload, or fall back.
    pub async fn finish(
        &self,
        recording: RecordingUpload,
        bridge: &AgentBridge,
    ) -> Result<UploadResolution, UplinkError> {
        let RecordingUpload { upload, session } = recording;

        match session.finish().await {
            SessionOutcome::LiveSucceeded { total_bytes } => {
                info!(upload_id = %upload.upload_id, total_bytes, "recording_upload: delivered progressively");
                Ok(UploadResolution::Delivered {
                    upload_id: upload.upload_id,
                })
            }
            SessionOutcome::FallbackToDeferred { payload, error } => {
                warn!(
                    upload_id = %upload.upload_id,
                    error = %error,
                    "recording_upload: progressive upload failed, handing off"
                );
                self.hand_off(upload, payload, bridge).await
            }
        }
    }

    /// The page is being hidden or closed mid-recording: persist what exists
    /// and let the agent deliver it.
    pub async fn on_page_hidden(
        &self,
        recording: RecordingUpload,
        bridge: &AgentBridge,
    ) -> Result<UploadResolution, UplinkError> {
        let RecordingUpload { upload, session } = recording;
        let payload = session.abandon();
        info!(
            upload_id = %upload.upload_id,
            payload_len = payload.len(),
            "recording_upload: page hidden, persisting recording"
        );
        self.hand_off(upload, payload, bridge).await
    }

    async fn hand_off(
        &self,
        upload: SignedUpload,
        payload: Bytes,
        bridge: &AgentBridge,
    ) -> Result<UploadResolution, UplinkError> {
        let saved = match self.store.as_ref() {
            Some(store) => {
                store
                    .save(payload.to_vec(), &upload.upload_id, &upload.upload_url)
                    .await
            }
            None => Err(UplinkError::StorageUnavailable("store not open".to_string())),
        };

        let record_id = match saved {
            Ok(record_id) => record_id,
            Err(UplinkError::StorageUnavailable(reason)) => {
                // The recording is still in memory; deliver it from here.
                warn!(upload_id = %upload.upload_id, reason = %reason, "recording_upload: store unavailable, delivering in page");
                self.driver.deliver_whole(&upload.upload_url, payload).await?;
                return Ok(UploadResolution::Delivered {
                    upload_id: upload.upload_id,
                });
            }
            Err(err) => return Err(err),
        };

        if bridge.start_upload(&record_id) {
            return Ok(UploadResolution::HandedToAgent {
                record_id,
                upload_id: upload.upload_id,
            });
        }

        if let Err(err) = bridge.request_recovery_notification() {
            warn!(record_id = %record_id, error = %err, "recording_upload: recovery registration failed");
        }
        Ok(UploadResolution::Queued {
            record_id,
            upload_id: upload.upload_id,
        })
    }

    /// Manual retry of a stored recording from the page, progressive over the
    /// stored payload, then one whole-payload PUT if the chunks give out. The
    /// record is removed once either path is accepted.
    pub async fn retry_record(&self, record_id: &str) -> Result<UploadResolution, UplinkError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| UplinkError::StorageUnavailable("store not open".to_string()))?;

        let Some(record) = store.begin_attempt(record_id).await? else {
            return Err(UplinkError::InvalidPayload(format!(
                "record {record_id} is missing or already being delivered"
            )));
        };

        match self
            .driver
            .upload_buffered(&record.remote_upload_url, record.payload.clone())
            .await
        {
            SessionOutcome::LiveSucceeded { total_bytes } => {
                store.delete(&record.id).await?;
                info!(record_id = %record.id, total_bytes, "recording_upload: manual retry delivered");
                Ok(UploadResolution::Delivered {
                    upload_id: record.remote_upload_id,
                })
            }
            SessionOutcome::FallbackToDeferred { payload, error } => {
                warn!(
                    record_id = %record.id,
                    error = %error,
                    "recording_upload: progressive retry failed, sending whole payload"
                );
                match self.driver.deliver_whole(&record.remote_upload_url, payload).await {
                    Ok(()) => {
                        store.delete(&record.id).await?;
                        info!(record_id = %record.id, "recording_upload: manual retry delivered whole");
                        Ok(UploadResolution::Delivered {
                            upload_id: record.remote_upload_id,
                        })
                    }
                    Err(deferred_err) => {
                        if let Err(mark_err) = store.update_status(&record.id, UploadStatus::Failed).await {
                            error!(record_id = %record.id, error = %mark_err, "recording_upload: failed to mark record failed");
                        }
                        Err(deferred_err)
                    }
                }
            }
        }
    }

    /// Drops a stored recording. An attempt already in flight is not
    /// cancelled; it finishes against a record that no longer exists.
    pub async fn discard(&self, record_id: &str) -> Result<(), UplinkError> {
        match self.store.as_ref() {
            Some(store) => store.delete(record_id).await,
            None => Ok(()),
        }
    }
}
