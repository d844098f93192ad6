use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::{errors::UplinkError, value_objects::relay::RelayEvent};

#[async_trait]
pub trait RelayConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection + Send>, UplinkError>;
}

/// One persistent bidirectional connection to a relay process.
#[async_trait]
pub trait RelayConnection {
    async fn send_text(&mut self, text: String) -> Result<(), UplinkError>;

    /// Queues a binary frame without waiting for it to hit the wire.
    fn send_frame(&mut self, frame: Bytes) -> Result<(), UplinkError>;

    /// Bytes queued but not yet written to the socket.
    fn buffered_amount(&self) -> usize;

    /// Next inbound event, `None` once the connection is fully torn down.
    async fn next_event(&mut self) -> Option<RelayEvent>;

    async fn close(&mut self, code: u16);
}
