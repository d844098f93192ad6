pub mod agent_states;
pub mod upload_statuses;
