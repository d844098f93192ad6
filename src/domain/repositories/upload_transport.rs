use async_trait::async_trait;
use bytes::Bytes;
use mockall::automock;

use crate::domain::{errors::UplinkError, value_objects::content_range::ContentRange};

#[automock]
#[async_trait]
pub trait UploadTransport {
    /// PUTs `body` to `url`. Returns the response status; a transport-level
    /// failure is an `Err(NetworkFailure)`.
    async fn put(
        &self,
        url: &str,
        content_range: Option<ContentRange>,
        body: Bytes,
    ) -> Result<u16, UplinkError>;
}
