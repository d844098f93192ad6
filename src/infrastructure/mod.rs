pub mod axum_http;
pub mod http;
pub mod sqlite;
pub mod websocket;
