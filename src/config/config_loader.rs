use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};

use crate::domain::value_objects::upload_records::DEFAULT_SEGMENT_BYTES;

use super::config_model::{
    AgentConfig, AgentServer, AssetPollConfig, ChunkUploadConfig, MediaProviderConfig,
    RelayConfig, Store, UplinkConfig,
};

// One segment has to stay below SQLite's default blob ceiling of 1e9 bytes.
const MAX_SEGMENT_BYTES: usize = 512 * 1024 * 1024;

pub fn load() -> Result<UplinkConfig> {
    dotenvy::dotenv().ok();
    load_from(|key| std::env::var(key).ok())
}

/// Builds the config from any key lookup; `load` feeds it the environment.
pub fn load_from<F>(lookup: F) -> Result<UplinkConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let store = Store {
        path: lookup("UPLINK_STORE_PATH")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "uplink-records.sqlite3".to_string()),
        purge_max_age: Duration::from_secs(
            parse_or(&lookup, "UPLINK_STORE_PURGE_MAX_AGE_HOURS", 168_u64)?
                .checked_mul(3600)
                .context("UPLINK_STORE_PURGE_MAX_AGE_HOURS is too large")?,
        ),
        segment_bytes: parse_or(&lookup, "UPLINK_STORE_SEGMENT_BYTES", DEFAULT_SEGMENT_BYTES)?,
    };
    if !(1..=MAX_SEGMENT_BYTES).contains(&store.segment_bytes) {
        anyhow::bail!("UPLINK_STORE_SEGMENT_BYTES must be between 1 and {MAX_SEGMENT_BYTES}");
    }

    let upload_defaults = ChunkUploadConfig::default();
    let upload = ChunkUploadConfig {
        alignment_bytes: parse_or(
            &lookup,
            "UPLOAD_CHUNK_ALIGNMENT_BYTES",
            upload_defaults.alignment_bytes,
        )?,
        max_attempts: parse_or(
            &lookup,
            "UPLOAD_CHUNK_MAX_ATTEMPTS",
            upload_defaults.max_attempts,
        )?,
        retry_delay: millis_or(&lookup, "UPLOAD_CHUNK_RETRY_DELAY_MS", upload_defaults.retry_delay)?,
        request_timeout: Duration::from_secs(parse_or(
            &lookup,
            "UPLOAD_REQUEST_TIMEOUT_SECS",
            upload_defaults.request_timeout.as_secs(),
        )?),
        whole_request_timeout: Duration::from_secs(parse_or(
            &lookup,
            "UPLOAD_WHOLE_REQUEST_TIMEOUT_SECS",
            upload_defaults.whole_request_timeout.as_secs(),
        )?),
    };
    if upload.alignment_bytes == 0 {
        anyhow::bail!("UPLOAD_CHUNK_ALIGNMENT_BYTES must be >= 1");
    }
    if upload.max_attempts == 0 {
        anyhow::bail!("UPLOAD_CHUNK_MAX_ATTEMPTS must be >= 1");
    }

    let media_provider = MediaProviderConfig {
        base_url: lookup("MEDIA_PROVIDER_BASE_URL")
            .unwrap_or_else(|| "http://127.0.0.1:3000".to_string()),
    };
    url::Url::parse(&media_provider.base_url).context("MEDIA_PROVIDER_BASE_URL is invalid")?;

    let relay_defaults = RelayConfig::default();
    let relay = RelayConfig {
        url: lookup("RELAY_URL").unwrap_or(relay_defaults.url),
        encoding: lookup("RELAY_ENCODING").unwrap_or(relay_defaults.encoding),
        handshake_timeout: millis_or(
            &lookup,
            "RELAY_HANDSHAKE_TIMEOUT_MS",
            relay_defaults.handshake_timeout,
        )?,
        drain_timeout: millis_or(&lookup, "RELAY_DRAIN_TIMEOUT_MS", relay_defaults.drain_timeout)?,
        drain_poll_interval: relay_defaults.drain_poll_interval,
        flush_pause: millis_or(&lookup, "RELAY_FLUSH_PAUSE_MS", relay_defaults.flush_pause)?,
        backpressure_ceiling_bytes: parse_or(
            &lookup,
            "RELAY_BACKPRESSURE_CEILING_BYTES",
            relay_defaults.backpressure_ceiling_bytes,
        )?,
    };

    let poll_defaults = AssetPollConfig::default();
    let asset_poll = AssetPollConfig {
        interval: millis_or(&lookup, "ASSET_POLL_INTERVAL_MS", poll_defaults.interval)?,
        timeout: Duration::from_secs(parse_or(
            &lookup,
            "ASSET_POLL_TIMEOUT_SECS",
            poll_defaults.timeout.as_secs(),
        )?),
    };

    let agent = AgentConfig {
        recovery_supported: match lookup("AGENT_RECOVERY_SUPPORTED") {
            Some(raw) => parse_bool(&raw).context("AGENT_RECOVERY_SUPPORTED is invalid")?,
            None => AgentConfig::default().recovery_supported,
        },
    };

    let agent_server = AgentServer {
        port: parse_or(&lookup, "AGENT_SERVER_PORT", 8090_u16)?,
        body_limit_mb: parse_or(&lookup, "AGENT_SERVER_BODY_LIMIT_MB", 8_u64)?,
        timeout_secs: parse_or(&lookup, "AGENT_SERVER_TIMEOUT_SECS", 30_u64)?,
        internal_token: lookup("AGENT_INTERNAL_TOKEN").and_then(|v| {
            let trimmed = v.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        }),
    };

    Ok(UplinkConfig {
        store,
        upload,
        media_provider,
        relay,
        asset_poll,
        agent,
        agent_server,
    })
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} is invalid")),
        None => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(lookup, key, default_ms).map(Duration::from_millis)
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_documented_defaults() {
        let config = load_from(lookup_from(&[])).unwrap();

        assert_eq!(config.upload, ChunkUploadConfig::default());
        assert_eq!(config.upload.alignment_bytes, 262_144);
        assert_eq!(config.upload.max_attempts, 3);
        assert!(config.upload.whole_request_timeout > config.upload.request_timeout);
        assert_eq!(config.relay.handshake_timeout, Duration::from_secs(12));
        assert_eq!(config.relay.drain_timeout, Duration::from_secs(8));
        assert_eq!(config.relay.flush_pause, Duration::from_millis(200));
        assert_eq!(config.relay.backpressure_ceiling_bytes, 5 * 1024 * 1024);
        assert_eq!(config.store.purge_max_age, Duration::from_secs(168 * 3600));
        assert_eq!(config.store.segment_bytes, 64 * 1024 * 1024);
        assert!(config.agent.recovery_supported);
        assert_eq!(config.agent_server.internal_token, None);
    }

    #[test]
    fn overrides_are_applied() {
        let config = load_from(lookup_from(&[
            ("UPLOAD_CHUNK_MAX_ATTEMPTS", "5"),
            ("UPLOAD_CHUNK_RETRY_DELAY_MS", "250"),
            ("UPLOAD_WHOLE_REQUEST_TIMEOUT_SECS", "900"),
            ("RELAY_URL", "wss://relay.example/ingest"),
            ("AGENT_RECOVERY_SUPPORTED", "off"),
            ("AGENT_INTERNAL_TOKEN", "  s3cret  "),
        ]))
        .unwrap();

        assert_eq!(config.upload.max_attempts, 5);
        assert_eq!(config.upload.retry_delay, Duration::from_millis(250));
        assert_eq!(config.upload.whole_request_timeout, Duration::from_secs(900));
        assert_eq!(config.relay.url, "wss://relay.example/ingest");
        assert!(!config.agent.recovery_supported);
        assert_eq!(config.agent_server.internal_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn invalid_value_names_the_key() {
        let err = load_from(lookup_from(&[("RELAY_DRAIN_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("RELAY_DRAIN_TIMEOUT_MS"));

        let err = load_from(lookup_from(&[("UPLOAD_CHUNK_ALIGNMENT_BYTES", "0")])).unwrap_err();
        assert!(err.to_string().contains("UPLOAD_CHUNK_ALIGNMENT_BYTES"));

        let err = load_from(lookup_from(&[("UPLINK_STORE_SEGMENT_BYTES", "2000000000")])).unwrap_err();
        assert!(err.to_string().contains("UPLINK_STORE_SEGMENT_BYTES"));
    }
}
