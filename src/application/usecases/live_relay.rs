use bytes::Bytes;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::config_model::RelayConfig,
    domain::{
        errors::UplinkError,
        repositories::{
            capture::Capturer,
            media_provider::MediaProvider,
            relay::{RelayConnection, RelayConnector},
        },
        value_objects::{
            media_provider::LiveStreamCredentials,
            relay::{LiveStatus, NORMAL_CLOSURE, RelayControl, RelayEvent, RelayReply},
        },
    },
};

const ELAPSED_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct FrameCounters {
    sent: AtomicU64,
    dropped: AtomicU64,
    bytes_sent: AtomicU64,
}

impl FrameCounters {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSessionSummary {
    pub stream_id: String,
    pub playback_id: String,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
    pub elapsed_secs: u64,
    /// Whether the provider acknowledged the end of the stream.
    pub finalized: bool,
}

/// Capture-to-relay pipeline for indefinite live sessions. Nothing here is
/// persisted; a lost relay ends the session.
pub struct LiveRelayDriver {
    provider: Arc<dyn MediaProvider + Send + Sync>,
    connector: Arc<dyn RelayConnector + Send + Sync>,
    config: RelayConfig,
}

impl LiveRelayDriver {
    pub fn new(
        provider: Arc<dyn MediaProvider + Send + Sync>,
        connector: Arc<dyn RelayConnector + Send + Sync>,
        config: RelayConfig,
    ) -> Self {
        Self {
            provider,
            connector,
            config,
        }
    }

    pub async fn start(&self, capturer: Box<dyn Capturer + Send>) -> Result<LiveSession, UplinkError> {
        let (status, _) = watch::channel(LiveStatus::Connecting);
        self.start_observed(capturer, status).await
    }

    /// Like `start`, but reports on a status channel the caller already
    /// holds, so `Connecting` and a failed setup are visible before the
    /// session handle exists.
    pub async fn start_observed(
        &self,
        mut capturer: Box<dyn Capturer + Send>,
        status: watch::Sender<LiveStatus>,
    ) -> Result<LiveSession, UplinkError> {
        let frames = capturer.start().await.inspect_err(|err| {
            warn!(error = %err, "live_relay: capture could not start");
            status.send_replace(LiveStatus::Failed(err.to_string()));
        })?;
        status.send_replace(LiveStatus::Connecting);

        let credentials = match self.provider.create_live_stream().await {
            Ok(credentials) => credentials,
            Err(err) => {
                release_capture(capturer.as_mut(), frames).await;
                status.send_replace(LiveStatus::Failed(err.to_string()));
                return Err(err);
            }
        };
        info!(stream_id = %credentials.stream_id, "live_relay: stream credentials issued");

        let mut connection = match self.connector.connect(&self.config.url).await {
            Ok(connection) => connection,
            Err(err) => {
                error!(stream_id = %credentials.stream_id, error = %err, "live_relay: relay connect failed");
                release_capture(capturer.as_mut(), frames).await;
                status.send_replace(LiveStatus::Failed(err.to_string()));
                return Err(err);
            }
        };

        if let Err(err) = handshake(connection.as_mut(), &credentials, &self.config).await {
            error!(stream_id = %credentials.stream_id, error = %err, "live_relay: handshake failed");
            connection.close(NORMAL_CLOSURE).await;
            release_capture(capturer.as_mut(), frames).await;
            status.send_replace(LiveStatus::Failed(err.to_string()));
            return Err(err);
        }
        info!(stream_id = %credentials.stream_id, "live_relay: relay ready, forwarding frames");

        let status_rx = status.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel();
        let counters = Arc::new(FrameCounters::default());

        let task = SessionTask {
            capturer,
            connection,
            frames,
            provider: Arc::clone(&self.provider),
            config: self.config.clone(),
            stream_id: credentials.stream_id.clone(),
            playback_id: credentials.playback_id.clone(),
            status,
            counters: Arc::clone(&counters),
            started: Instant::now(),
        };

        Ok(LiveSession {
            stream_id: credentials.stream_id,
            playback_id: credentials.playback_id,
            status: status_rx,
            counters,
            stop: Some(stop_tx),
            task: Some(tokio::spawn(task.run(stop_rx))),
        })
    }
}

async fn handshake(
    connection: &mut (dyn RelayConnection + Send),
    credentials: &LiveStreamCredentials,
    config: &RelayConfig,
) -> Result<(), UplinkError> {
    let start = RelayControl::Start {
        stream_key: credentials.stream_key.clone(),
        mime_type: config.encoding.clone(),
    };
    let text = serde_json::to_string(&start)
        .map_err(|err| UplinkError::InvalidPayload(format!("relay start message: {err}")))?;
    connection.send_text(text).await?;

    let wait_ready = async {
        loop {
            match connection.next_event().await {
                Some(RelayEvent::Reply(RelayReply::Ready)) => return Ok(()),
                Some(RelayEvent::Reply(RelayReply::Error { message })) => {
                    return Err(UplinkError::NetworkFailure(format!(
                        "relay refused the stream: {message}"
                    )));
                }
                Some(RelayEvent::Closed { code, reason }) => {
                    return Err(UplinkError::RelayLost(format!(
                        "closed during handshake (code {code:?}): {reason}"
                    )));
                }
                None => {
                    return Err(UplinkError::RelayLost(
                        "connection dropped during handshake".to_string(),
                    ));
                }
            }
        }
    };

    tokio::time::timeout(config.handshake_timeout, wait_ready)
        .await
        .map_err(|_| {
            UplinkError::Timeout(format!(
                "relay not ready after {} ms",
                config.handshake_timeout.as_millis()
            ))
        })?
}

async fn release_capture(capturer: &mut (dyn Capturer + Send), mut frames: mpsc::Receiver<Bytes>) {
    frames.close();
    capturer.stop().await;
    capturer.stop_tracks();
}

/// Handle on a running live session. Dropping it stops the session in the
/// background through the same ordered shutdown as `stop`.
pub struct LiveSession {
    stream_id: String,
    playback_id: String,
    status: watch::Receiver<LiveStatus>,
    counters: Arc<FrameCounters>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<LiveSessionSummary, UplinkError>>>,
}

impl LiveSession {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn playback_id(&self) -> &str {
        &self.playback_id
    }

    pub fn status(&self) -> watch::Receiver<LiveStatus> {
        self.status.clone()
    }

    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    /// Runs the ordered shutdown, or returns the error that already ended
    /// the session.
    pub async fn stop(mut self) -> Result<LiveSessionSummary, UplinkError> {
        if let Some(stop) = self.stop.take() {
            // Already finished on its own when the receiver is gone.
            let _ = stop.send(());
        }
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|err| {
                Err(UplinkError::RelayLost(format!("live session task ended abnormally: {err}")))
            }),
            None => Err(UplinkError::RelayLost("live session already stopped".to_string())),
        }
    }
}

struct SessionTask {
    capturer: Box<dyn Capturer + Send>,
    connection: Box<dyn RelayConnection + Send>,
    frames: mpsc::Receiver<Bytes>,
    provider: Arc<dyn MediaProvider + Send + Sync>,
    config: RelayConfig,
    stream_id: String,
    playback_id: String,
    status: watch::Sender<LiveStatus>,
    counters: Arc<FrameCounters>,
    started: Instant,
}

impl SessionTask {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) -> Result<LiveSessionSummary, UplinkError> {
        let mut ticker = tokio::time::interval(ELAPSED_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.status.send_replace(LiveStatus::Live { elapsed_secs: 0 });

        loop {
            tokio::select! {
                // Fires on an explicit stop and when the handle is dropped.
                _ = &mut stop => break,
                frame = self.frames.recv() => match frame {
                    Some(frame) => {
                        if let Err(err) = self.forward(frame) {
                            return self.fail(err).await;
                        }
                    }
                    None => {
                        info!(stream_id = %self.stream_id, "live_relay: capture ended, stopping");
                        break;
                    }
                },
                event = self.connection.next_event() => match event {
                    Some(RelayEvent::Reply(RelayReply::Error { message })) => {
                        warn!(stream_id = %self.stream_id, message = %message, "live_relay: relay reported an error");
                    }
                    Some(RelayEvent::Reply(RelayReply::Ready)) => {}
                    Some(RelayEvent::Closed { code, reason }) => {
                        return self
                            .fail(UplinkError::RelayLost(format!("closed with code {code:?}: {reason}")))
                            .await;
                    }
                    None => {
                        return self
                            .fail(UplinkError::RelayLost("connection dropped".to_string()))
                            .await;
                    }
                },
                _ = ticker.tick() => {
                    self.status.send_replace(LiveStatus::Live {
                        elapsed_secs: self.started.elapsed().as_secs(),
                    });
                }
            }
        }

        self.shutdown().await
    }

    /// Drops the frame instead of queueing it when the socket is backed up.
    fn forward(&mut self, frame: Bytes) -> Result<(), UplinkError> {
        let buffered = self.connection.buffered_amount();
        let frame_len = frame.len() as u64;

        if buffered > self.config.backpressure_ceiling_bytes {
            let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(buffered, frame_len, dropped, "live_relay: backpressure, frame dropped");
            return Ok(());
        }

        self.connection.send_frame(frame)?;
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_sent.fetch_add(frame_len, Ordering::Relaxed);
        Ok(())
    }

    async fn flush_remaining_frames(&mut self) -> Result<(), UplinkError> {
        while let Some(frame) = self.frames.recv().await {
            self.forward(frame)?;
        }
        Ok(())
    }

    async fn wait_for_drain(&mut self) -> bool {
        let deadline = Instant::now() + self.config.drain_timeout;
        loop {
            let buffered = self.connection.buffered_amount();
            if buffered == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(stream_id = %self.stream_id, buffered, "live_relay: drain timed out, closing anyway");
                return false;
            }
            tokio::time::sleep(self.config.drain_poll_interval).await;
        }
    }

    async fn shutdown(mut self) -> Result<LiveSessionSummary, UplinkError> {
        self.status.send_replace(LiveStatus::Stopping);
        info!(stream_id = %self.stream_id, "live_relay: stopping session");

        self.capturer.stop().await;
        match tokio::time::timeout(self.config.drain_timeout, self.flush_remaining_frames()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return self.fail(err).await,
            Err(_) => warn!(stream_id = %self.stream_id, "live_relay: capture did not flush in time"),
        }

        tokio::time::sleep(self.config.flush_pause).await;
        let drained = self.wait_for_drain().await;

        self.connection.close(NORMAL_CLOSURE).await;
        self.capturer.stop_tracks();

        let finalized = match self.provider.complete_live_stream(&self.stream_id).await {
            Ok(()) => true,
            Err(err) => {
                warn!(stream_id = %self.stream_id, error = %err, "live_relay: stream completion not acknowledged");
                false
            }
        };

        let summary = self.summary(finalized);
        info!(
            stream_id = %summary.stream_id,
            frames_sent = summary.frames_sent,
            frames_dropped = summary.frames_dropped,
            elapsed_secs = summary.elapsed_secs,
            drained,
            finalized,
            "live_relay: session ended"
        );
        self.status.send_replace(LiveStatus::Ended);
        Ok(summary)
    }

    /// Fatal path: release capture and socket, report, no reconnect.
    async fn fail(mut self, err: UplinkError) -> Result<LiveSessionSummary, UplinkError> {
        error!(stream_id = %self.stream_id, error = %err, "live_relay: session failed");

        self.frames.close();
        self.capturer.stop().await;
        self.capturer.stop_tracks();
        self.connection.close(NORMAL_CLOSURE).await;

        self.status.send_replace(LiveStatus::Failed(err.to_string()));
        Err(err)
    }

    fn summary(&self, finalized: bool) -> LiveSessionSummary {
        LiveSessionSummary {
            stream_id: self.stream_id.clone(),
            playback_id: self.playback_id.clone(),
            frames_sent: self.counters.sent(),
            frames_dropped: self.counters.dropped(),
            bytes_sent: self.counters.bytes_sent(),
            elapsed_secs: self.started.elapsed().as_secs(),
            finalized,
        }
    }
}
