use async_trait::async_trait;
use mockall::automock;

use crate::domain::{
    errors::UplinkError,
    value_objects::{enums::upload_statuses::UploadStatus, upload_records::UploadRecord},
};

/// Durable queue of recordings awaiting delivery.
///
/// Mutations are self-contained read-modify-write transactions. An update
/// aimed at a record that has meanwhile been deleted is a silent no-op:
/// absence wins over update.
#[automock]
#[async_trait]
pub trait UploadRecordRepository {
    async fn save(
        &self,
        payload: Vec<u8>,
        remote_upload_id: &str,
        remote_upload_url: &str,
    ) -> Result<String, UplinkError>;

    async fn get(&self, id: &str) -> Result<Option<UploadRecord>, UplinkError>;

    /// Records awaiting (re)delivery, `pending` or `failed`, oldest first.
    async fn get_all_pending(&self) -> Result<Vec<UploadRecord>, UplinkError>;

    /// Ids of the records `get_all_pending` would return, without loading
    /// their payloads.
    async fn pending_ids(&self) -> Result<Vec<String>, UplinkError>;

    async fn update_status(&self, id: &str, status: UploadStatus) -> Result<(), UplinkError>;

    /// Atomically claims an eligible record for a delivery attempt, moving it
    /// to `uploading`. Returns `None` when the record is gone or already
    /// being delivered.
    async fn begin_attempt(&self, id: &str) -> Result<Option<UploadRecord>, UplinkError>;

    async fn delete(&self, id: &str) -> Result<(), UplinkError>;

    /// Removes records created strictly before `cutoff_ms`.
    async fn purge_created_before(&self, cutoff_ms: i64) -> Result<usize, UplinkError>;
}
