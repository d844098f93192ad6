use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Serialize, de::DeserializeOwned};
use tracing::info;
use url::Url;

use crate::domain::{
    errors::UplinkError,
    repositories::media_provider::MediaProvider,
    value_objects::media_provider::{AssetStatus, LiveStreamCredentials, SignedUpload},
};

/// Client for the proxy routes that issue signed uploads and live-stream
/// credentials on behalf of the media service.
pub struct HttpMediaProvider {
    client: Client,
    base_url: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteLiveStreamRequest<'a> {
    stream_id: &'a str,
}

impl HttpMediaProvider {
    pub fn new(base_url: &str) -> Result<Self, UplinkError> {
        let base_url = Url::parse(base_url).map_err(|err| {
            UplinkError::InvalidPayload(format!("invalid media provider url: {err}"))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|_| UplinkError::NetworkFailure("failed to build http client".to_string()))?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, UplinkError> {
        self.base_url
            .join(path)
            .map_err(|err| UplinkError::InvalidPayload(format!("invalid endpoint {path}: {err}")))
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, UplinkError> {
        let response = ensure_success(response)?;
        response
            .json::<T>()
            .await
            .map_err(|err| UplinkError::NetworkFailure(format!("malformed response: {err}")))
    }
}

fn ensure_success(response: Response) -> Result<Response, UplinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(UplinkError::RemoteRejected {
        status: status.as_u16(),
    })
}

#[async_trait]
impl MediaProvider for HttpMediaProvider {
    async fn create_upload(&self) -> Result<SignedUpload, UplinkError> {
        let response = self
            .client
            .post(self.endpoint("api/upload")?)
            .send()
            .await
            .map_err(|err| UplinkError::from(err.without_url()))?;
        let upload: SignedUpload = Self::read_json(response).await?;

        info!(upload_id = %upload.upload_id, "media_provider: signed upload issued");
        Ok(upload)
    }

    async fn create_live_stream(&self) -> Result<LiveStreamCredentials, UplinkError> {
        let response = self
            .client
            .post(self.endpoint("api/live-stream")?)
            .send()
            .await
            .map_err(|err| UplinkError::from(err.without_url()))?;
        let credentials: LiveStreamCredentials = Self::read_json(response).await?;

        info!(
            stream_id = %credentials.stream_id,
            playback_id = %credentials.playback_id,
            "media_provider: live stream issued"
        );
        Ok(credentials)
    }

    async fn complete_live_stream(&self, stream_id: &str) -> Result<(), UplinkError> {
        let response = self
            .client
            .post(self.endpoint("api/live-stream/complete")?)
            .json(&CompleteLiveStreamRequest { stream_id })
            .send()
            .await
            .map_err(|err| UplinkError::from(err.without_url()))?;
        ensure_success(response)?;

        info!(stream_id = %stream_id, "media_provider: live stream completion acknowledged");
        Ok(())
    }

    async fn asset_status(&self, id: &str) -> Result<AssetStatus, UplinkError> {
        let mut url = self.endpoint("api/asset/")?;
        url.path_segments_mut()
            .map_err(|_| UplinkError::InvalidPayload("media provider url cannot be a base".into()))?
            .pop_if_empty()
            .push(id);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| UplinkError::from(err.without_url()))?;
        Self::read_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::StatusCode,
        routing::{get, post},
    };
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    async fn spawn_provider() -> String {
        let app = Router::new()
            .route(
                "/api/upload",
                post(|| async {
                    Json(json!({ "uploadUrl": "https://storage.example/u1", "uploadId": "u1" }))
                }),
            )
            .route(
                "/api/live-stream",
                post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
            )
            .route(
                "/api/live-stream/complete",
                post(|Json(body): Json<Value>| async move {
                    if body["streamId"] == "st_1" {
                        StatusCode::OK
                    } else {
                        StatusCode::BAD_REQUEST
                    }
                }),
            )
            .route(
                "/api/asset/:id",
                get(|Path(id): Path<String>| async move {
                    Json(json!({ "status": "ready", "playbackId": format!("pb-{id}") }))
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn issues_signed_upload() {
        let provider = HttpMediaProvider::new(&spawn_provider().await).unwrap();
        let upload = provider.create_upload().await.unwrap();
        assert_eq!(upload.upload_id, "u1");
        assert_eq!(upload.upload_url, "https://storage.example/u1");
    }

    #[tokio::test]
    async fn non_success_maps_to_remote_rejected() {
        let provider = HttpMediaProvider::new(&spawn_provider().await).unwrap();
        let err = provider.create_live_stream().await.unwrap_err();
        assert!(matches!(err, UplinkError::RemoteRejected { status: 503 }));
    }

    #[tokio::test]
    async fn completion_and_asset_lookup() {
        let provider = HttpMediaProvider::new(&spawn_provider().await).unwrap();
        provider.complete_live_stream("st_1").await.unwrap();

        let status = provider.asset_status("a1").await.unwrap();
        assert_eq!(status.playback_id.as_deref(), Some("pb-a1"));
    }
}
