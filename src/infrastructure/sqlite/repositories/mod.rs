pub mod upload_records;
