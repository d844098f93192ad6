use async_trait::async_trait;
use chrono::Utc;
use diesel::{connection::DefaultLoadingMode, prelude::*};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    domain::{
        entities::upload_records::{
            InsertUploadRecordSegmentEntity, UploadRecordEntity, new_record_id,
        },
        errors::UplinkError,
        repositories::upload_records::UploadRecordRepository,
        value_objects::{
            enums::upload_statuses::UploadStatus,
            upload_records::{DEFAULT_SEGMENT_BYTES, UploadRecord},
        },
    },
    infrastructure::sqlite::{
        schema::{upload_record_segments, upload_records},
        sqlite_connection::{SqlitePoolSquad, establish_connection},
    },
};

// Keeps `eq_any` lists well under SQLite's bound-parameter limit.
const DELETE_BATCH: usize = 500;

/// Explicit handle on the durable record store. Owned by whoever opened it
/// and shared by cloning the `Arc` it is wrapped in.
pub struct UploadRecordSqlite {
    db_pool: Arc<SqlitePoolSquad>,
    segment_bytes: usize,
}

impl UploadRecordSqlite {
    pub fn new(db_pool: Arc<SqlitePoolSquad>) -> Self {
        Self {
            db_pool,
            segment_bytes: DEFAULT_SEGMENT_BYTES,
        }
    }

    /// Opens the store and returns any attempt a previous process left in
    /// `uploading` to `failed`, where the next scan picks it up again.
    pub fn open(database_path: &str) -> Result<Self, UplinkError> {
        let pool = establish_connection(database_path)?;

        let released = release_interrupted_attempts(&mut *pool.get()?)?;
        if released > 0 {
            warn!(released, "sqlite: interrupted delivery attempts returned to failed");
        }

        info!(path = %database_path, "sqlite: upload record store opened");
        Ok(Self::new(Arc::new(pool)))
    }

    pub fn with_segment_bytes(mut self, segment_bytes: usize) -> Self {
        self.segment_bytes = segment_bytes.max(1);
        self
    }

    /// Ends the handle lifecycle. The connection closes once no in-flight
    /// operation still holds the pool.
    pub fn close(self) {
        drop(self.db_pool);
        debug!("sqlite: upload record store closed");
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, UplinkError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, UplinkError> + Send + 'static,
    {
        let pool = Arc::clone(&self.db_pool);
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            op(&mut conn)
        })
        .await
        .map_err(|err| UplinkError::StorageUnavailable(format!("store task failed: {err}")))?
    }
}

fn release_interrupted_attempts(conn: &mut SqliteConnection) -> Result<usize, UplinkError> {
    let released = diesel::update(
        upload_records::table.filter(upload_records::status.eq(UploadStatus::Uploading.to_string())),
    )
    .set(upload_records::status.eq(UploadStatus::Failed.to_string()))
    .execute(conn)?;
    Ok(released)
}

fn find_entity(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<UploadRecordEntity>, UplinkError> {
    let entity = upload_records::table
        .find(id)
        .select(UploadRecordEntity::as_select())
        .first::<UploadRecordEntity>(conn)
        .optional()?;
    Ok(entity)
}

/// Reassembles a record's payload from its segments, in order.
fn load_record(
    conn: &mut SqliteConnection,
    entity: UploadRecordEntity,
) -> Result<UploadRecord, UplinkError> {
    let mut payload = Vec::with_capacity(usize::try_from(entity.payload_len).unwrap_or_default());
    let segments = upload_record_segments::table
        .filter(upload_record_segments::record_id.eq(&entity.id))
        .order(upload_record_segments::seq.asc())
        .select(upload_record_segments::data)
        .load_iter::<Vec<u8>, DefaultLoadingMode>(conn)?;
    for segment in segments {
        payload.extend_from_slice(&segment?);
    }

    UploadRecord::try_from((entity, payload))
}

fn delete_records(conn: &mut SqliteConnection, ids: &[String]) -> Result<usize, UplinkError> {
    let mut deleted = 0;
    for batch in ids.chunks(DELETE_BATCH) {
        diesel::delete(
            upload_record_segments::table.filter(upload_record_segments::record_id.eq_any(batch)),
        )
        .execute(conn)?;
        deleted +=
            diesel::delete(upload_records::table.filter(upload_records::id.eq_any(batch)))
                .execute(conn)?;
    }
    Ok(deleted)
}

fn parse_status(raw: &str) -> Result<UploadStatus, UplinkError> {
    raw.parse::<UploadStatus>()
        .map_err(UplinkError::StorageUnavailable)
}

#[async_trait]
impl UploadRecordRepository for UploadRecordSqlite {
    async fn save(
        &self,
        payload: Vec<u8>,
        remote_upload_id: &str,
        remote_upload_url: &str,
    ) -> Result<String, UplinkError> {
        let payload_len = payload.len();
        let insert_entity = UploadRecordEntity {
            id: new_record_id(),
            remote_upload_id: remote_upload_id.to_string(),
            remote_upload_url: remote_upload_url.to_string(),
            payload_len: i64::try_from(payload_len)
                .map_err(|_| UplinkError::InvalidPayload("payload too large".to_string()))?,
            status: UploadStatus::Pending.to_string(),
            created_at: Utc::now().timestamp_millis(),
            retry_count: 0,
        };
        let id = insert_entity.id.clone();
        let segment_bytes = self.segment_bytes;

        let segments = self
            .with_conn(move |conn| {
                conn.immediate_transaction::<_, UplinkError, _>(|conn| {
                    diesel::insert_into(upload_records::table)
                        .values(&insert_entity)
                        .execute(conn)?;

                    let mut segments = 0;
                    for (seq, data) in payload.chunks(segment_bytes).enumerate() {
                        let seq = i32::try_from(seq).map_err(|_| {
                            UplinkError::InvalidPayload("payload has too many segments".to_string())
                        })?;
                        diesel::insert_into(upload_record_segments::table)
                            .values(&InsertUploadRecordSegmentEntity {
                                record_id: &insert_entity.id,
                                seq,
                                data,
                            })
                            .execute(conn)?;
                        segments += 1;
                    }
                    Ok(segments)
                })
            })
            .await?;

        info!(record_id = %id, payload_len, segments, "sqlite: upload record saved");
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<UploadRecord>, UplinkError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            find_entity(conn, &id)?
                .map(|entity| load_record(conn, entity))
                .transpose()
        })
        .await
    }

    async fn get_all_pending(&self) -> Result<Vec<UploadRecord>, UplinkError> {
        self.with_conn(|conn| {
            let eligible = vec![
                UploadStatus::Pending.to_string(),
                UploadStatus::Failed.to_string(),
            ];
            let entities = upload_records::table
                .filter(upload_records::status.eq_any(eligible))
                .order((upload_records::created_at.asc(), upload_records::id.asc()))
                .select(UploadRecordEntity::as_select())
                .load::<UploadRecordEntity>(conn)?;

            entities
                .into_iter()
                .map(|entity| load_record(conn, entity))
                .collect()
        })
        .await
    }
    async fn pending_ids(&self) -> Result<Vec<String>, UplinkError> {
        self.with_conn(|conn| {
            let eligible = vec![
                UploadStatus::Pending.to_string(),
                UploadStatus::Failed.to_string(),
            ];
            let ids = upload_records::table
                .filter(upload_records::status.eq_any(eligible))
                .order((upload_records::created_at.asc(), upload_records::id.asc()))
                .select(upload_records::id)
                .load::<String>(conn)?;
            Ok(ids)
        })
        .await
    }

    async fn update_status(&self, id: &str, status: UploadStatus) -> Result<(), UplinkError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, UplinkError, _>(|conn| {
                // The record may have been delivered and deleted by another
                // context in the meantime; absence wins.
                let Some(current) = find_entity(conn, &id)? else {
                    debug!(record_id = %id, status = %status, "sqlite: update on missing record ignored");
                    return Ok(());
                };

                let from = parse_status(&current.status)?;
                if !from.can_transition_to(status) {
                    return Err(UplinkError::InvalidTransition { from, to: status });
                }

                let retry_count = if status.counts_as_attempt() {
                    current.retry_count.saturating_add(1)
                } else {
                    current.retry_count
                };

                diesel::update(upload_records::table.find(&id))
                    .set((
                        upload_records::status.eq(status.to_string()),
                        upload_records::retry_count.eq(retry_count),
                    ))
                    .execute(conn)?;

                Ok(())
            })
        })
        .await
    }

    async fn begin_attempt(&self, id: &str) -> Result<Option<UploadRecord>, UplinkError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, UplinkError, _>(|conn| {
                let Some(mut current) = find_entity(conn, &id)? else {
                    return Ok(None);
                };

                if !parse_status(&current.status)?.is_eligible_for_pickup() {
                    return Ok(None);
                }

                current.status = UploadStatus::Uploading.to_string();
                current.retry_count = current.retry_count.saturating_add(1);

                diesel::update(upload_records::table.find(&id))
                    .set((
                        upload_records::status.eq(&current.status),
                        upload_records::retry_count.eq(current.retry_count),
                    ))
                    .execute(conn)?;

                load_record(conn, current).map(Some)
            })
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), UplinkError> {
        let ids = vec![id.to_string()];
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, UplinkError, _>(|conn| delete_records(conn, &ids))?;
            Ok(())
        })
        .await
    }

    async fn purge_created_before(&self, cutoff_ms: i64) -> Result<usize, UplinkError> {
        let purged = self
            .with_conn(move |conn| {
                conn.immediate_transaction::<_, UplinkError, _>(|conn| {
                    let stale = upload_records::table
                        .filter(upload_records::created_at.lt(cutoff_ms))
                        .select(upload_records::id)
                        .load::<String>(conn)?;
                    delete_records(conn, &stale)
                })
            })
            .await?;

        if purged > 0 {
            info!(purged, cutoff_ms, "sqlite: stale upload records purged");
        }
        Ok(purged)
    }
}

/// Deletes every record older than `max_age`, measured from now.
pub async fn purge_older_than(
    store: &(dyn UploadRecordRepository + Send + Sync),
    max_age: std::time::Duration,
) -> Result<usize, UplinkError> {
    let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
    let cutoff_ms = Utc::now().timestamp_millis().saturating_sub(max_age_ms);
    store.purge_created_before(cutoff_ms).await
}
