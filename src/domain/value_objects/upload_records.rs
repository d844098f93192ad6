use bytes::Bytes;

use crate::domain::{
    entities::upload_records::UploadRecordEntity, errors::UplinkError,
    value_objects::enums::upload_statuses::UploadStatus,
};

/// Stored payloads are split into rows of this size unless configured
/// otherwise.
pub const DEFAULT_SEGMENT_BYTES: usize = 64 * 1024 * 1024;

/// One recording awaiting delivery, as handed out by the store.
#[derive(Clone, PartialEq)]
pub struct UploadRecord {
    pub id: String,
    pub remote_upload_id: String,
    pub remote_upload_url: String,
    pub payload: Bytes,
    pub status: UploadStatus,
    pub created_at: i64,
    pub retry_count: u32,
}

impl std::fmt::Debug for UploadRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRecord")
            .field("id", &self.id)
            .field("remote_upload_id", &self.remote_upload_id)
            .field("payload_len", &self.payload.len())
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

/// A stored record is its metadata row plus the reassembled payload.
impl TryFrom<(UploadRecordEntity, Vec<u8>)> for UploadRecord {
    type Error = UplinkError;

    fn try_from((entity, payload): (UploadRecordEntity, Vec<u8>)) -> Result<Self, Self::Error> {
        let status = entity
            .status
            .parse::<UploadStatus>()
            .map_err(UplinkError::StorageUnavailable)?;

        if i64::try_from(payload.len()).ok() != Some(entity.payload_len) {
            return Err(UplinkError::StorageUnavailable(format!(
                "record {} payload is {} bytes, expected {}",
                entity.id,
                payload.len(),
                entity.payload_len
            )));
        }

        Ok(Self {
            id: entity.id,
            remote_upload_id: entity.remote_upload_id,
            remote_upload_url: entity.remote_upload_url,
            payload: Bytes::from(payload),
            status,
            created_at: entity.created_at,
            retry_count: u32::try_from(entity.retry_count).unwrap_or_default(),
        })
    }
}
