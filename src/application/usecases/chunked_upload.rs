use bytes::{Bytes, BytesMut};
use std::{sync::Arc, time::Instant};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::config_model::ChunkUploadConfig,
    domain::{
        errors::UplinkError,
        repositories::upload_transport::UploadTransport,
        value_objects::content_range::{ContentRange, validate_chunk_len},
    },
};

/// Status the resumable-upload protocol uses for "chunk stored, send more".
pub const RESUME_INCOMPLETE: u16 = 308;

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn is_chunk_success(status: u16) -> bool {
    is_success(status) || status == RESUME_INCOMPLETE
}

/// How a progressive session ended. Decided once, when the session finishes.
#[derive(Debug)]
pub enum SessionOutcome {
    LiveSucceeded { total_bytes: u64 },
    /// The progressive path gave up; `payload` is everything recorded, ready
    /// for a single deferred PUT.
    FallbackToDeferred { payload: Bytes, error: UplinkError },
}

#[derive(Debug)]
struct PendingChunk {
    bytes: Bytes,
    is_final: bool,
}

/// Delivers payloads to signed upload URLs, either whole or as aligned
/// byte-range chunks.
pub struct ChunkedUploadDriver {
    transport: Arc<dyn UploadTransport + Send + Sync>,
    config: ChunkUploadConfig,
}

impl ChunkedUploadDriver {
    pub fn new(transport: Arc<dyn UploadTransport + Send + Sync>, config: ChunkUploadConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ChunkUploadConfig {
        &self.config
    }

    /// Deferred delivery: one PUT of the whole payload, no range header. The
    /// endpoint chunks internally. No retry here; callers re-queue.
    pub async fn deliver_whole(&self, upload_url: &str, payload: Bytes) -> Result<(), UplinkError> {
        let payload_len = payload.len();
        let start = Instant::now();

        let status = self.transport.put(upload_url, None, payload).await?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if !is_success(status) {
            warn!(status, payload_len, elapsed_ms, "chunked_upload: deferred delivery rejected");
            return Err(UplinkError::RemoteRejected { status });
        }

        info!(payload_len, elapsed_ms, "chunked_upload: deferred delivery accepted");
        Ok(())
    }

    /// Starts a progressive session. Fragments pushed into it are cut into
    /// aligned chunks and uploaded in order while more keep arriving.
    pub fn start_session(&self, upload_url: impl Into<String>) -> ChunkUploadSession {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = watch::channel(0u64);

        let worker = tokio::spawn(drain_chunks(
            Arc::clone(&self.transport),
            upload_url.into(),
            self.config.clone(),
            chunk_rx,
            progress_tx,
        ));

        ChunkUploadSession {
            alignment: self.config.alignment_bytes.max(1),
            buffer: BytesMut::new(),
            enqueued: Vec::new(),
            enqueued_bytes: 0,
            chunks: Some(chunk_tx),
            progress: progress_rx,
            worker: Some(worker),
        }
    }

    /// Progressive delivery of an already complete payload, used for manual
    /// retries of a finished recording.
    pub async fn upload_buffered(&self, upload_url: &str, payload: Bytes) -> SessionOutcome {
        let mut session = self.start_session(upload_url);
        session.push_fragment(&payload);
        session.finish().await
    }
}

/// One in-progress byte-range upload. Owned by the recording that created it;
/// dropping it stops the background worker.
pub struct ChunkUploadSession {
    alignment: usize,
    /// Bytes received but not yet cut into a chunk.
    buffer: BytesMut,
    /// Every chunk handed to the worker, kept for the deferred fallback.
    enqueued: Vec<Bytes>,
    enqueued_bytes: u64,
    chunks: Option<mpsc::UnboundedSender<PendingChunk>>,
    progress: watch::Receiver<u64>,
    worker: Option<JoinHandle<Result<u64, UplinkError>>>,
}

impl ChunkUploadSession {
    /// Appends a fragment and enqueues every full aligned chunk it completes.
    pub fn push_fragment(&mut self, fragment: &[u8]) {
        self.buffer.extend_from_slice(fragment);

        while self.buffer.len() >= self.alignment {
            let chunk = self.buffer.split_to(self.alignment).freeze();
            self.enqueue(chunk, false);
        }
    }

    /// Bytes waiting for more data or for finalization.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes already handed to the upload worker.
    pub fn enqueued_bytes(&self) -> u64 {
        self.enqueued_bytes
    }

    /// Total bytes confirmed by the remote endpoint so far.
    pub fn progress(&self) -> watch::Receiver<u64> {
        self.progress.clone()
    }

    fn enqueue(&mut self, bytes: Bytes, is_final: bool) {
        self.enqueued_bytes += bytes.len() as u64;
        self.enqueued.push(bytes.clone());

        let Some(chunks) = self.chunks.as_ref() else {
            return;
        };
        // A closed channel means the worker already failed for good; the
        // chunk is still kept for the fallback payload.
        if chunks.send(PendingChunk { bytes, is_final }).is_err() {
            debug!(is_final, "chunked_upload: worker gone, chunk kept for fallback");
        }
    }

    fn recorded_payload(&self) -> Bytes {
        let mut payload = BytesMut::with_capacity(self.enqueued_bytes as usize + self.buffer.len());
        for chunk in &self.enqueued {
            payload.extend_from_slice(chunk);
        }
        payload.extend_from_slice(&self.buffer);
        payload.freeze()
    }

    /// Flushes the remainder as the final chunk (possibly empty) and waits for
    /// the worker to settle the session.
    pub async fn finish(mut self) -> SessionOutcome {
        let remainder = self.buffer.split().freeze();
        self.enqueue(remainder, true);
        self.chunks = None;

        let result = match self.worker.take() {
            Some(worker) => worker.await.unwrap_or_else(|err| {
                Err(UplinkError::NetworkFailure(format!("upload worker stopped: {err}")))
            }),
            None => Err(UplinkError::NetworkFailure("upload worker missing".to_string())),
        };

        match result {
            Ok(total_bytes) => SessionOutcome::LiveSucceeded { total_bytes },
            Err(error) => {
                let payload = self.recorded_payload();
                warn!(
                    payload_len = payload.len(),
                    error = %error,
                    "chunked_upload: progressive session failed, falling back to deferred delivery"
                );
                SessionOutcome::FallbackToDeferred { payload, error }
            }
        }
    }

    /// Stops the worker without finalizing and returns everything recorded so
    /// far. Used when the owning page goes away mid-recording.
    pub fn abandon(mut self) -> Bytes {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.chunks = None;
        self.recorded_payload()
    }
}

impl Drop for ChunkUploadSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn drain_chunks(
    transport: Arc<dyn UploadTransport + Send + Sync>,
    upload_url: String,
    config: ChunkUploadConfig,
    mut chunks: mpsc::UnboundedReceiver<PendingChunk>,
    progress: watch::Sender<u64>,
) -> Result<u64, UplinkError> {
    let mut uploaded_bytes: u64 = 0;

    while let Some(chunk) = chunks.recv().await {
        let len = chunk.bytes.len();
        validate_chunk_len(len, chunk.is_final, config.alignment_bytes)?;

        let range = ContentRange::for_chunk(uploaded_bytes, len as u64, chunk.is_final);
        put_chunk_with_retry(transport.as_ref(), &upload_url, range, chunk.bytes, &config)
            .await
            .inspect_err(|err| {
                error!(
                    offset = uploaded_bytes,
                    chunk_len = len,
                    error = %err,
                    "chunked_upload: chunk permanently failed"
                );
            })?;

        uploaded_bytes += len as u64;
        progress.send_replace(uploaded_bytes);

        if chunk.is_final {
            info!(total_bytes = uploaded_bytes, "chunked_upload: progressive upload finalized");
            return Ok(uploaded_bytes);
        }
    }

    Err(UplinkError::InvalidPayload(
        "upload session ended without a final chunk".to_string(),
    ))
}

async fn put_chunk_with_retry(
    transport: &(dyn UploadTransport + Send + Sync),
    upload_url: &str,
    range: ContentRange,
    body: Bytes,
    config: &ChunkUploadConfig,
) -> Result<(), UplinkError> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let start = Instant::now();

        let failure = match transport.put(upload_url, Some(range), body.clone()).await {
            Ok(status) if is_chunk_success(status) => {
                debug!(
                    range = %range,
                    status,
                    attempt,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "chunked_upload: chunk accepted"
                );
                return Ok(());
            }
            Ok(status) => UplinkError::RemoteRejected { status },
            Err(err) => err,
        };

        if !failure.is_retryable() || attempt >= max_attempts {
            return Err(failure);
        }

        warn!(
            range = %range,
            attempt,
            max_attempts,
            error = %failure,
            retry_delay_ms = config.retry_delay.as_millis() as u64,
            "chunked_upload: chunk failed, retrying"
        );
        tokio::time::sleep(config.retry_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        repositories::upload_transport::MockUploadTransport,
        value_objects::content_range::CHUNK_ALIGNMENT_BYTES,
    };
    use parking_lot::Mutex;
    use std::time::Duration;

    type PutLog = Arc<Mutex<Vec<(Option<ContentRange>, usize)>>>;

    /// Transport that records every PUT and answers with `respond`.
    fn recording_transport<F>(respond: F) -> (Arc<MockUploadTransport>, PutLog)
    where
        F: Fn(usize, Option<ContentRange>) -> Result<u16, UplinkError> + Send + 'static,
    {
        let log: PutLog = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&log);
        let mut transport = MockUploadTransport::new();
        transport.expect_put().returning(move |_url, range, body| {
            let mut seen = seen.lock();
            seen.push((range, body.len()));
            respond(seen.len(), range)
        });
        (Arc::new(transport), log)
    }

    fn protocol_status(range: Option<ContentRange>) -> Result<u16, UplinkError> {
        match range {
            Some(range) if !range.is_final() => Ok(RESUME_INCOMPLETE),
            _ => Ok(200),
        }
    }

    fn driver(transport: Arc<MockUploadTransport>) -> ChunkedUploadDriver {
        ChunkedUploadDriver::new(transport, ChunkUploadConfig::default())
    }

    #[tokio::test]
    async fn fragments_are_cut_at_the_alignment_boundary() {
        let (transport, _log) = recording_transport(|_, range| protocol_status(range));
        let mut session = driver(transport).start_session("https://storage.test/u/1");

        session.push_fragment(&vec![7u8; 600_000]);

        assert_eq!(session.enqueued_bytes(), 2 * CHUNK_ALIGNMENT_BYTES as u64);
        assert_eq!(session.buffered_len(), 75_712);
    }

    #[tokio::test]
    async fn chunk_offsets_are_contiguous() {
        let (transport, log) = recording_transport(|_, range| protocol_status(range));
        let mut session = driver(transport).start_session("https://storage.test/u/1");

        for _ in 0..7 {
            session.push_fragment(&vec![1u8; 100_000]);
        }
        let outcome = session.finish().await;

        assert!(matches!(outcome, SessionOutcome::LiveSucceeded { total_bytes: 700_000 }));
        let ranges: Vec<String> = log
            .lock()
            .iter()
            .map(|(range, _)| range.map(|r| r.to_string()).unwrap_or_default())
            .collect();
        assert_eq!(
            ranges,
            vec![
                "bytes 0-262143/*",
                "bytes 262144-524287/*",
                "bytes 524288-699999/700000",
            ]
        );

        let mut expected_start = 0u64;
        for (range, len) in log.lock().iter() {
            let Some(ContentRange::Bytes { start, end, total }) = range else {
                panic!("expected byte range");
            };
            assert_eq!(*start, expected_start);
            assert_eq!(end - start + 1, *len as u64);
            if total.is_none() {
                assert_eq!(*len % CHUNK_ALIGNMENT_BYTES, 0);
            }
            expected_start += *len as u64;
        }
    }

    #[tokio::test]
    async fn aligned_payload_finishes_with_empty_finalize() {
        let (transport, log) = recording_transport(|_, range| protocol_status(range));
        let mut session = driver(transport).start_session("https://storage.test/u/1");

        session.push_fragment(&vec![3u8; 2 * CHUNK_ALIGNMENT_BYTES]);
        let outcome = session.finish().await;

        assert!(matches!(outcome, SessionOutcome::LiveSucceeded { total_bytes: 524_288 }));
        let log = log.lock();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2], (Some(ContentRange::Finalize { total: 524_288 }), 0));
    }

    #[tokio::test(start_paused = true)]
    async fn three_server_errors_fall_back_with_the_full_payload() {
        let (transport, log) = recording_transport(|_, _| Ok(500));
        let mut session = driver(transport).start_session("https://storage.test/u/1");

        let payload: Vec<u8> = (0..600_000u32).map(|i| (i % 251) as u8).collect();
        session.push_fragment(&payload[..300_000]);
        session.push_fragment(&payload[300_000..]);

        match session.finish().await {
            SessionOutcome::FallbackToDeferred { payload: recorded, error } => {
                assert_eq!(recorded.as_ref(), payload.as_slice());
                assert!(matches!(error, UplinkError::RemoteRejected { status: 500 }));
            }
            other => panic!("expected fallback, got {other:?}"),
        }

        // First chunk tried three times, nothing after it.
        let log = log.lock();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|(range, _)| range.map(|r| r.to_string())
            == Some("bytes 0-262143/*".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_after_the_delay() {
        let (transport, log) = recording_transport(|call, range| {
            if call == 1 {
                Err(UplinkError::NetworkFailure("connection reset".into()))
            } else {
                protocol_status(range)
            }
        });
        let mut session = driver(transport).start_session("https://storage.test/u/1");
        let progress = session.progress();

        let started = tokio::time::Instant::now();
        session.push_fragment(&vec![0u8; 1000]);
        let outcome = session.finish().await;

        assert!(matches!(outcome, SessionOutcome::LiveSucceeded { total_bytes: 1000 }));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(log.lock().len(), 2);
        assert_eq!(*progress.borrow(), 1000);
    }

    #[tokio::test]
    async fn deferred_delivery_sends_one_unranged_put() {
        let (transport, log) = recording_transport(|_, _| Ok(201));
        let driver = driver(transport);

        driver
            .deliver_whole("https://storage.test/u/1", Bytes::from(vec![9u8; 600_000]))
            .await
            .unwrap();

        assert_eq!(log.lock().as_slice(), &[(None, 600_000)]);
    }

    #[tokio::test]
    async fn deferred_delivery_does_not_accept_resume_incomplete() {
        let (transport, log) = recording_transport(|_, _| Ok(RESUME_INCOMPLETE));
        let err = driver(transport)
            .deliver_whole("https://storage.test/u/1", Bytes::from_static(b"abc"))
            .await
            .unwrap_err();

        assert!(matches!(err, UplinkError::RemoteRejected { status: 308 }));
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn abandon_returns_everything_pushed() {
        let (transport, _log) = recording_transport(|_, range| protocol_status(range));
        let mut session = driver(transport).start_session("https://storage.test/u/1");

        session.push_fragment(&vec![5u8; 300_000]);
        let payload = session.abandon();

        assert_eq!(payload.len(), 300_000);
    }
}
