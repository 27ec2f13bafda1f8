//! tokio-tungstenite transport

use super::{CloseInfo, Transport, TransportEvent, TransportEvents};
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use chat_common::config::GatewayConfig;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// One open connection: the write half plus its read loop
struct Connection {
    sink: WsSink,
    reader_cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl Connection {
    fn stop_reader(&self) {
        self.reader_cancel.cancel();
        self.reader.abort();
    }
}

/// Default limit on opening a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket transport with a send-side mutex and chunked writes
pub struct WebSocketTransport {
    max_frame_size: usize,
    connect_timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.max(1),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connection: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.max_frame_size).with_connect_timeout(config.connect_timeout())
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> GatewayResult<TransportEvents> {
        let previous = self.connection.lock().await.take();
        if let Some(mut old) = previous {
            old.stop_reader();
            let _ = old.sink.close().await;
        }

        // Handshake runs without the connection lock so sends and disconnects fail fast meanwhile
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                GatewayError::Connect(format!(
                    "handshake not completed within {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        let (sink, stream) = stream.split();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader_cancel = CancellationToken::new();
        let reader = tokio::spawn(read_loop(stream, events_tx, reader_cancel.clone()));

        let replaced = self.connection.lock().await.replace(Connection {
            sink,
            reader_cancel,
            reader,
        });
        if let Some(mut stale) = replaced {
            stale.stop_reader();
            let _ = stale.sink.close().await;
        }
        tracing::debug!(url, "WebSocket connected");
        Ok(events_rx)
    }

    async fn send(&self, payload: Vec<u8>, text: bool) -> GatewayResult<()> {
        let mut slot = self.connection.lock().await;
        let connection = slot.as_mut().ok_or(GatewayError::NotConnected)?;
        let sink = &mut connection.sink;

        if payload.len() <= self.max_frame_size {
            let message = if text {
                Message::Text(
                    String::from_utf8(payload).map_err(|e| GatewayError::Send(e.to_string()))?,
                )
            } else {
                Message::Binary(payload)
            };
            return sink
                .send(message)
                .await
                .map_err(|e| GatewayError::Send(e.to_string()));
        }

        let frames = chunk_frames(&payload, text, self.max_frame_size);
        tracing::trace!(bytes = payload.len(), frames = frames.len(), "Sending chunked message");
        for frame in frames {
            sink.feed(Message::Frame(frame))
                .await
                .map_err(|e| GatewayError::Send(e.to_string()))?;
        }
        sink.flush()
            .await
            .map_err(|e| GatewayError::Send(e.to_string()))
    }

    async fn disconnect(&self, code: u16) {
        let Some(mut connection) = self.connection.lock().await.take() else {
            return;
        };

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        if let Err(e) = connection.sink.send(Message::Close(Some(frame))).await {
            tracing::debug!(error = %e, "Close frame not delivered");
        }
        let _ = connection.sink.close().await;
        connection.stop_reader();
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("max_frame_size", &self.max_frame_size)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Split `payload` into a first data frame and continuation frames of at most `max` bytes
#[must_use]
pub fn chunk_frames(payload: &[u8], text: bool, max: usize) -> Vec<Frame> {
    let first = OpCode::Data(if text { Data::Text } else { Data::Binary });
    let chunks: Vec<&[u8]> = payload.chunks(max.max(1)).collect();
    let last = chunks.len().saturating_sub(1);

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let opcode = if i == 0 {
                first
            } else {
                OpCode::Data(Data::Continue)
            };
            Frame::message(chunk.to_vec(), opcode, i == last)
        })
        .collect()
}

/// Forward complete messages until the connection ends.
///
/// Every error is converted into a single `Closed` event; nothing escapes.
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let close = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if events.send(TransportEvent::Message(text.into_bytes())).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                if events.send(TransportEvent::Message(data)).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => CloseInfo::new(Some(u16::from(frame.code)), frame.reason),
                    None => CloseInfo::new(None, "closed without a code"),
                };
            }
            // Pings are answered by tungstenite itself
            Some(Ok(_)) => {}
            Some(Err(e)) => break CloseInfo::new(None, e.to_string()),
            None => break CloseInfo::new(None, "stream ended"),
        }
    };

    tracing::debug!(close = %close, "WebSocket read loop ended");
    let _ = events.send(TransportEvent::Closed(close));
}
