pub mod media_provider;
pub mod upload_transport;
