pub mod capture;
pub mod media_provider;
pub mod relay;
pub mod upload_records;
pub mod upload_transport;
