pub mod agent_messages;
pub mod content_range;
pub mod enums;
pub mod media_provider;
pub mod relay;
pub mod upload_records;
