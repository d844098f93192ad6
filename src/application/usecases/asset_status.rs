use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    config::config_model::AssetPollConfig,
    domain::{
        errors::UplinkError, repositories::media_provider::MediaProvider,
        value_objects::media_provider::AssetState,
    },
};

/// Polls the provider until the asset is playable and returns its playback
/// id. Transient lookup failures keep polling; the overall bound still holds.
pub async fn wait_for_asset(
    provider: &(dyn MediaProvider + Send + Sync),
    id: &str,
    config: &AssetPollConfig,
) -> Result<String, UplinkError> {
    let deadline = Instant::now() + config.timeout;

    loop {
        match provider.asset_status(id).await {
            Ok(status) => match (status.status, status.playback_id) {
                (AssetState::Ready, Some(playback_id)) => {
                    info!(asset_id = %id, "asset_status: asset ready");
                    return Ok(playback_id);
                }
                (AssetState::Errored, _) => {
                    warn!(asset_id = %id, "asset_status: asset processing failed");
                    return Err(UplinkError::AssetFailed(format!("asset {id} errored")));
                }
                (state, _) => debug!(asset_id = %id, state = ?state, "asset_status: not ready yet"),
            },
            Err(err) if err.is_retryable() => {
                warn!(asset_id = %id, error = %err, "asset_status: lookup failed, polling again");
            }
            Err(err) => return Err(err),
        }

        if Instant::now() + config.interval > deadline {
            return Err(UplinkError::Timeout(format!(
                "asset {id} not ready after {} s",
                config.timeout.as_secs()
            )));
        }
        tokio::time::sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        repositories::media_provider::MockMediaProvider,
        value_objects::media_provider::AssetStatus,
    };
    use std::time::Duration;

    fn status(state: AssetState, playback_id: Option<&str>) -> AssetStatus {
        AssetStatus {
            status: state,
            playback_id: playback_id.map(str::to_string),
        }
    }

    fn poll_config() -> AssetPollConfig {
        AssetPollConfig {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_playback_id_once_ready() {
        let mut provider = MockMediaProvider::new();
        let mut calls = 0;
        provider.expect_asset_status().times(3).returning(move |_| {
            calls += 1;
            match calls {
                1 => Ok(status(AssetState::Preparing, None)),
                2 => Err(UplinkError::NetworkFailure("reset".into())),
                _ => Ok(status(AssetState::Ready, Some("pb_7"))),
            }
        });

        let playback_id = wait_for_asset(&provider, "up_7", &poll_config()).await.unwrap();
        assert_eq!(playback_id, "pb_7");
    }

    #[tokio::test(start_paused = true)]
    async fn errored_asset_fails_immediately() {
        let mut provider = MockMediaProvider::new();
        provider
            .expect_asset_status()
            .times(1)
            .returning(|_| Ok(status(AssetState::Errored, None)));

        let err = wait_for_asset(&provider, "up_7", &poll_config()).await.unwrap_err();
        assert!(matches!(err, UplinkError::AssetFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_bound() {
        let mut provider = MockMediaProvider::new();
        provider
            .expect_asset_status()
            .returning(|_| Ok(status(AssetState::Waiting, None)));

        let started = Instant::now();
        let err = wait_for_asset(&provider, "up_7", &poll_config()).await.unwrap_err();

        assert!(matches!(err, UplinkError::Timeout(_)));
        assert!(started.elapsed() <= Duration::from_secs(30));
    }
}
