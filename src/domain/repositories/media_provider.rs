use async_trait::async_trait;
use mockall::automock;

use crate::domain::{
    errors::UplinkError,
    value_objects::media_provider::{AssetStatus, LiveStreamCredentials, SignedUpload},
};

/// Thin proxy routes in front of the remote media service.
#[automock]
#[async_trait]
pub trait MediaProvider {
    async fn create_upload(&self) -> Result<SignedUpload, UplinkError>;

    async fn create_live_stream(&self) -> Result<LiveStreamCredentials, UplinkError>;

    /// Acknowledges the end of a live stream. The remote service detects the
    /// end from the relay disconnect; this only confirms it.
    async fn complete_live_stream(&self, stream_id: &str) -> Result<(), UplinkError>;

    async fn asset_status(&self, id: &str) -> Result<AssetStatus, UplinkError>;
}
