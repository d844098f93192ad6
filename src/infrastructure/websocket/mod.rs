pub mod relay_connection;
