pub mod agent_commands;
pub mod purge_records;
