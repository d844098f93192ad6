pub mod repositories;
pub mod schema;
pub mod sqlite_connection;
