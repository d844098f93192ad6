use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, header::CONTENT_RANGE, redirect::Policy};
use tracing::debug;

use crate::domain::{
    errors::UplinkError, repositories::upload_transport::UploadTransport,
    value_objects::content_range::ContentRange,
};

/// Byte-range PUTs against signed upload URLs.
///
/// Redirects are never followed: a 308 is the chunk protocol's "incomplete,
/// continue" answer and must reach the caller as a status.
pub struct HttpUploadTransport {
    client: Client,
    chunk_timeout: Duration,
    whole_timeout: Duration,
}

impl HttpUploadTransport {
    /// `chunk_timeout` bounds ranged PUTs; `whole_timeout` bounds the single
    /// unranged PUT of a complete payload.
    pub fn new(chunk_timeout: Duration, whole_timeout: Duration) -> Result<Self, UplinkError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::none())
            .build()
            .map_err(|_| UplinkError::NetworkFailure("failed to build http client".to_string()))?;

        Ok(Self {
            client,
            chunk_timeout,
            whole_timeout,
        })
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn put(
        &self,
        url: &str,
        content_range: Option<ContentRange>,
        body: Bytes,
    ) -> Result<u16, UplinkError> {
        let body_len = body.len();
        let mut request = self.client.put(url).body(body);
        request = match content_range {
            Some(range) => request
                .header(CONTENT_RANGE, range.to_string())
                .timeout(self.chunk_timeout),
            None => request.timeout(self.whole_timeout),
        };

        let response = request.send().await.map_err(|err| {
            // Status-less transport errors only; statuses are returned below.
            UplinkError::from(err.without_url())
        })?;
        let status = response.status().as_u16();

        debug!(
            content_range = ?content_range.map(|range| range.to_string()),
            body_len,
            status,
            "upload_transport: put completed"
        );
        Ok(status)
    }
}
