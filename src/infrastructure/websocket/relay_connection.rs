use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, stream::SplitStream};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, warn};

use crate::domain::{
    errors::UplinkError,
    repositories::relay::{RelayConnection, RelayConnector},
    value_objects::relay::{RelayEvent, RelayReply},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Outgoing {
    Text(String),
    Frame(Bytes),
    Close(u16),
}

pub struct WebSocketRelayConnector {
    connect_timeout: Duration,
}

impl WebSocketRelayConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketRelayConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl RelayConnector for WebSocketRelayConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection + Send>, UplinkError> {
        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| UplinkError::Timeout("relay connect".to_string()))?
            .map_err(|err| UplinkError::NetworkFailure(format!("relay connect failed: {err}")))?;

        debug!("relay_connection: websocket opened");
        Ok(Box::new(WebSocketRelayConnection::spawn(socket)))
    }
}

/// WebSocket with a writer task in front of the sink so frame sends never
/// block the caller. `buffered_amount` counts bytes handed over but not yet
/// flushed to the socket.
pub struct WebSocketRelayConnection {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    inbound: SplitStream<WsStream>,
    buffered: Arc<AtomicUsize>,
    writer: Option<JoinHandle<()>>,
    closed: bool,
}

impl WebSocketRelayConnection {
    fn spawn(socket: WsStream) -> Self {
        let (mut sink, inbound) = socket.split();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        let buffered = Arc::new(AtomicUsize::new(0));

        let writer_buffered = Arc::clone(&buffered);
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let result = match message {
                    Outgoing::Text(text) => sink.send(Message::Text(text)).await,
                    Outgoing::Frame(frame) => {
                        let len = frame.len();
                        let result = sink.send(Message::Binary(frame.to_vec())).await;
                        release(&writer_buffered, len);
                        result
                    }
                    Outgoing::Close(code) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "".into(),
                        };
                        if let Err(err) = sink.send(Message::Close(Some(frame))).await {
                            debug!(error = %err, "relay_connection: close frame not delivered");
                        }
                        break;
                    }
                };

                if let Err(err) = result {
                    warn!(error = %err, "relay_connection: write failed; writer stopping");
                    break;
                }
            }
            // Anything still queued is never written.
            writer_buffered.store(0, Ordering::Release);
        });

        Self {
            outgoing,
            inbound,
            buffered,
            writer: Some(writer),
            closed: false,
        }
    }

    fn enqueue(&self, message: Outgoing) -> Result<(), UplinkError> {
        self.outgoing
            .send(message)
            .map_err(|_| UplinkError::RelayLost("relay writer has stopped".to_string()))
    }
}

fn release(buffered: &AtomicUsize, len: usize) {
    let _ = buffered.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        Some(current.saturating_sub(len))
    });
}

#[async_trait]
impl RelayConnection for WebSocketRelayConnection {
    async fn send_text(&mut self, text: String) -> Result<(), UplinkError> {
        self.enqueue(Outgoing::Text(text))
    }

    fn send_frame(&mut self, frame: Bytes) -> Result<(), UplinkError> {
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::AcqRel);
        self.enqueue(Outgoing::Frame(frame))
            .inspect_err(|_| release(&self.buffered, len))
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    async fn next_event(&mut self) -> Option<RelayEvent> {
        if self.closed {
            return None;
        }

        while let Some(message) = self.inbound.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<RelayReply>(&text) {
                    Ok(reply) => return Some(RelayEvent::Reply(reply)),
                    Err(err) => {
                        warn!(error = %err, "relay_connection: unrecognised relay message ignored");
                    }
                },
                Ok(Message::Close(frame)) => {
                    self.closed = true;
                    let (code, reason) = frame
                        .map(|frame| (Some(u16::from(frame.code)), frame.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    return Some(RelayEvent::Closed { code, reason });
                }
                Ok(_) => {}
                Err(err) => {
                    self.closed = true;
                    return Some(RelayEvent::Closed {
                        code: None,
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.closed = true;
        Some(RelayEvent::Closed {
            code: None,
            reason: "connection ended".to_string(),
        })
    }

    async fn close(&mut self, code: u16) {
        if self.enqueue(Outgoing::Close(code)).is_err() {
            debug!("relay_connection: close requested after writer stopped");
        }
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
                warn!("relay_connection: writer did not finish after close");
            }
        }
    }
}
