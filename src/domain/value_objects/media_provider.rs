use serde::{Deserialize, Serialize};

/// Destination issued by the media provider for one file-style delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignedUpload {
    pub upload_url: String,
    pub upload_id: String,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamCredentials {
    pub stream_id: String,
    pub stream_key: String,
    pub playback_id: String,
}

impl std::fmt::Debug for LiveStreamCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStreamCredentials")
            .field("stream_id", &self.stream_id)
            .field("stream_key", &"[REDACTED]")
            .field("playback_id", &self.playback_id)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    Waiting,
    Preparing,
    Ready,
    Errored,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssetStatus {
    pub status: AssetState,
    #[serde(default)]
    pub playback_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_stream_key() {
        let creds = LiveStreamCredentials {
            stream_id: "st_1".to_string(),
            stream_key: "sk-live-secret".to_string(),
            playback_id: "pb_1".to_string(),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("st_1"));
        assert!(!rendered.contains("sk-live-secret"));
    }

    #[test]
    fn asset_status_tolerates_missing_playback_id() {
        let status: AssetStatus = serde_json::from_str(r#"{"status":"preparing"}"#).unwrap();
        assert_eq!(status.status, AssetState::Preparing);
        assert_eq!(status.playback_id, None);
    }
}
