use std::time::Duration;

use crate::domain::value_objects::{
    content_range::CHUNK_ALIGNMENT_BYTES, relay::DEFAULT_BACKPRESSURE_CEILING_BYTES,
};

#[derive(Debug, Clone)]
pub struct UplinkConfig {
    pub store: Store,
    pub upload: ChunkUploadConfig,
    pub media_provider: MediaProviderConfig,
    pub relay: RelayConfig,
    pub asset_poll: AssetPollConfig,
    pub agent: AgentConfig,
    pub agent_server: AgentServer,
}

#[derive(Debug, Clone)]
pub struct Store {
    pub path: String,
    pub purge_max_age: Duration,
    /// Payloads are written as rows of at most this many bytes each.
    pub segment_bytes: usize,
}

/// Chunk protocol knobs. The defaults are the values the remote storage
/// backend was integrated with.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkUploadConfig {
    pub alignment_bytes: usize,
    pub max_attempts: usize,
    pub retry_delay: Duration,
    /// Bound on one ranged chunk PUT.
    pub request_timeout: Duration,
    /// Bound on the single PUT of a whole stored payload, which can run to
    /// gigabytes.
    pub whole_request_timeout: Duration,
}

impl Default for ChunkUploadConfig {
    fn default() -> Self {
        Self {
            alignment_bytes: CHUNK_ALIGNMENT_BYTES,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(300),
            whole_request_timeout: Duration::from_secs(4 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub url: String,
    pub encoding: String,
    pub handshake_timeout: Duration,
    pub drain_timeout: Duration,
    pub drain_poll_interval: Duration,
    pub flush_pause: Duration,
    pub backpressure_ceiling_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/relay".to_string(),
            encoding: "video/webm;codecs=vp8,opus".to_string(),
            handshake_timeout: Duration::from_secs(12),
            drain_timeout: Duration::from_secs(8),
            drain_poll_interval: Duration::from_millis(100),
            flush_pause: Duration::from_millis(200),
            backpressure_ceiling_bytes: DEFAULT_BACKPRESSURE_CEILING_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetPollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for AssetPollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Whether the host can deliver a recovery signal when connectivity
    /// returns.
    pub recovery_supported: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            recovery_supported: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentServer {
    pub port: u16,
    pub body_limit_mb: u64,
    pub timeout_secs: u64,
    pub internal_token: Option<String>,
}
