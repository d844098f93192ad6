use chrono::Utc;
use diesel::prelude::*;
use rand::{Rng, distributions::Alphanumeric};

use crate::infrastructure::sqlite::schema::{upload_record_segments, upload_records};

/// Record metadata. The payload itself lives in `upload_record_segments`.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable, Insertable, PartialEq)]
#[diesel(table_name = upload_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UploadRecordEntity {
    pub id: String,
    pub remote_upload_id: String,
    pub remote_upload_url: String,
    pub payload_len: i64,
    pub status: String,
    pub created_at: i64,
    pub retry_count: i32,
}

#[derive(Insertable)]
#[diesel(table_name = upload_record_segments)]
pub struct InsertUploadRecordSegmentEntity<'a> {
    pub record_id: &'a str,
    pub seq: i32,
    pub data: &'a [u8],
}

/// `{epoch millis}-{random suffix}`, sortable by creation time.
pub fn new_record_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_lead_with_timestamp_and_are_distinct() {
        let before = Utc::now().timestamp_millis();
        let first = new_record_id();
        let second = new_record_id();

        let (millis, suffix) = first.split_once('-').unwrap();
        assert!(millis.parse::<i64>().unwrap() >= before);
        assert_eq!(suffix.len(), 9);
        assert_ne!(first, second);
    }
}
