pub mod agent_bridge;
pub mod agent_host;
pub mod asset_status;
pub mod chunked_upload;
pub mod delivery_agent;
pub mod live_relay;
pub mod recording_upload;
