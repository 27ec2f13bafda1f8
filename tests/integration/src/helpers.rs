//! Test helpers for integration tests
//!
//! Fake servers run on ephemeral localhost ports inside the test runtime.
//! The gateway fake hands each accepted connection to the test as a
//! [`GatewayConn`]; the REST fake answers from a per-path script and records
//! when each request arrived.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Response, Uri};
use axum::Router;
use chat_common::ClientConfig;
use chat_gateway::{CloseCause, EventHandler, GatewayEvent};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response as WsResponse};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// How long any single wait in a test may take
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `fut`, failing the test if it takes longer than [`STEP_TIMEOUT`]
pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    match tokio::time::timeout(STEP_TIMEOUT, fut).await {
        Ok(out) => out,
        Err(_) => panic!("step timed out after {STEP_TIMEOUT:?}"),
    }
}

/// Config pointing at the fake servers with fast reconnects
pub fn test_config(gateway_url: &str, api_url: &str) -> ClientConfig {
    let mut config = ClientConfig::new("test-token");
    config.gateway.url = gateway_url.to_string();
    config.gateway.reconnect_base_delay_ms = 10;
    config.gateway.reconnect_max_delay_ms = 50;
    config.rest.base_url = api_url.to_string();
    config.rest.request_timeout_ms = 5_000;
    config
}

// === Fake gateway ===

enum Outbound {
    Frame(Value),
    Raw(String),
    Close(u16),
}

/// Server side of one accepted gateway connection
pub struct GatewayConn {
    /// Request URI the client connected with
    pub uri: String,
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<Outbound>,
}

impl GatewayConn {
    pub fn send(&self, frame: Value) {
        let _ = self.outgoing.send(Outbound::Frame(frame));
    }

    /// Send text as-is, valid JSON or not
    pub fn send_raw(&self, text: &str) {
        let _ = self.outgoing.send(Outbound::Raw(text.to_string()));
    }

    pub fn hello(&self, heartbeat_interval_ms: u64) {
        self.send(json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval_ms}}));
    }

    pub fn dispatch(&self, kind: &str, sequence: u64, data: Value) {
        self.send(json!({"op": 0, "t": kind, "s": sequence, "d": data}));
    }

    pub fn ready(&self, sequence: u64, session_id: &str, resume_url: &str) {
        self.dispatch(
            "READY",
            sequence,
            json!({"v": 10, "session_id": session_id, "resume_gateway_url": resume_url}),
        );
    }

    pub fn invalid_session(&self, resumable: bool) {
        self.send(json!({"op": 9, "d": resumable}));
    }

    pub fn close(&self, code: u16) {
        let _ = self.outgoing.send(Outbound::Close(code));
    }

    /// Next frame from the client with the given opcode; others are skipped
    pub async fn recv_op(&mut self, op: u8) -> Value {
        within(async {
            loop {
                let frame = self
                    .incoming
                    .recv()
                    .await
                    .unwrap_or_else(|| panic!("connection closed while waiting for op {op}"));
                if frame["op"] == op {
                    return frame;
                }
            }
        })
        .await
    }

    /// Hello, then the client's identify or resume frame
    pub async fn handshake(&mut self) -> Value {
        self.hello(45_000);
        within(async {
            loop {
                let frame = self.incoming.recv().await.expect("connection closed during handshake");
                if frame["op"] == 2 || frame["op"] == 6 {
                    return frame;
                }
            }
        })
        .await
    }
}

/// Gateway that hands every accepted connection to the test
pub struct FakeGateway {
    pub url: String,
    connections: mpsc::UnboundedReceiver<GatewayConn>,
    _handle: JoinHandle<()>,
}

impl FakeGateway {
    /// Listen on an ephemeral port; heartbeats are acked automatically when `auto_ack`
    pub async fn start(auto_ack: bool) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let url = format!("ws://{}", listener.local_addr()?);
        let (tx, connections) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, tx, auto_ack).await {
                        eprintln!("fake gateway connection failed: {e}");
                    }
                });
            }
        });

        Ok(Self {
            url,
            connections,
            _handle: handle,
        })
    }

    pub async fn accept(&mut self) -> GatewayConn {
        within(self.connections.recv())
            .await
            .expect("fake gateway stopped")
    }

    /// `None` if no connection arrives within `wait`
    pub async fn try_accept(&mut self, wait: Duration) -> Option<GatewayConn> {
        tokio::time::timeout(wait, self.connections.recv())
            .await
            .ok()
            .flatten()
    }
}

async fn serve_connection(
    stream: TcpStream,
    connections: mpsc::UnboundedSender<GatewayConn>,
    auto_ack: bool,
) -> Result<()> {
    let mut uri = String::new();
    let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: WsResponse| {
        uri = req.uri().to_string();
        Ok(resp)
    })
    .await?;

    let (in_tx, incoming) = mpsc::unbounded_channel();
    let (outgoing, mut out_rx) = mpsc::unbounded_channel();
    connections
        .send(GatewayConn {
            uri,
            incoming,
            outgoing,
        })
        .map_err(|_| anyhow!("test dropped the gateway"))?;

    loop {
        tokio::select! {
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text)?;
                    if auto_ack && frame["op"] == 1 {
                        ws.send(Message::Text(json!({"op": 11}).to_string())).await?;
                    }
                    let _ = in_tx.send(frame);
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            out = out_rx.recv() => match out {
                Some(Outbound::Frame(frame)) => {
                    ws.send(Message::Text(frame.to_string())).await?;
                }
                Some(Outbound::Raw(text)) => {
                    ws.send(Message::Text(text)).await?;
                }
                Some(Outbound::Close(code)) => {
                    ws.send(Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: "closed by test".into(),
                    })))
                    .await?;
                    break;
                }
                None => break,
            },
        }
    }
    Ok(())
}

// === Fake REST server ===

/// One scripted REST reply
#[derive(Debug, Clone)]
pub struct Scripted {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Scripted {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    /// 200 carrying bucket headers
    pub fn limited(hash: &str, limit: u32, remaining: u32, reset_after: f64) -> Self {
        Self::ok(json!({})).with_bucket(hash, limit, remaining, reset_after)
    }

    pub fn global_429(retry_after: f64) -> Self {
        Self {
            status: 429,
            headers: vec![("x-ratelimit-global", "true".to_string())],
            body: json!({"message": "You are being rate limited.", "retry_after": retry_after, "global": true})
                .to_string(),
        }
    }

    pub fn error(status: u16, code: u32, message: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: json!({"code": code, "message": message}).to_string(),
        }
    }

    pub fn with_bucket(mut self, hash: &str, limit: u32, remaining: u32, reset_after: f64) -> Self {
        self.headers.extend([
            ("x-ratelimit-bucket", hash.to_string()),
            ("x-ratelimit-limit", limit.to_string()),
            ("x-ratelimit-remaining", remaining.to_string()),
            ("x-ratelimit-reset-after", reset_after.to_string()),
        ]);
        self
    }
}

/// Arrival of one request at the fake REST server
#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub at: Instant,
}

#[derive(Default)]
struct RestState {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    hits: Mutex<Vec<Hit>>,
}

/// REST server answering from per-path scripts; unscripted paths get `200 {}`
pub struct FakeRest {
    pub url: String,
    state: Arc<RestState>,
    _handle: JoinHandle<()>,
}

impl FakeRest {
    pub async fn start() -> Result<Self> {
        let state = Arc::new(RestState::default());
        let app = Router::new()
            .fallback(handle_rest)
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let url = format!("http://{}", listener.local_addr()?);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            url,
            state,
            _handle: handle,
        })
    }

    /// Queue replies for `path`, served in order
    pub fn script(&self, path: &str, replies: impl IntoIterator<Item = Scripted>) {
        self.state
            .scripts
            .lock()
            .entry(path.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.state.hits.lock().clone()
    }

    pub fn hits_for(&self, path: &str) -> Vec<Instant> {
        self.hits()
            .into_iter()
            .filter(|hit| hit.path == path)
            .map(|hit| hit.at)
            .collect()
    }
}

async fn handle_rest(State(state): State<Arc<RestState>>, uri: Uri) -> Response<Body> {
    let path = uri.path().to_string();
    state.hits.lock().push(Hit {
        path: path.clone(),
        at: Instant::now(),
    });

    let reply = state
        .scripts
        .lock()
        .get_mut(&path)
        .and_then(VecDeque::pop_front)
        .unwrap_or_else(|| Scripted::ok(json!({})));

    let mut builder = Response::builder()
        .status(reply.status)
        .header("content-type", "application/json");
    for (name, value) in &reply.headers {
        builder = builder.header(*name, value.as_str());
    }
    builder
        .body(Body::from(reply.body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

// === Event recording ===

/// Handler forwarding everything it sees as short labels
pub struct Recorder {
    tx: mpsc::UnboundedSender<String>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn on_event(&self, event: GatewayEvent) {
        let _ = self.tx.send(event.kind);
    }

    async fn on_connected(&self, resumed: bool) {
        let _ = self.tx.send(format!("connected:{resumed}"));
    }

    async fn on_closed(&self, cause: CloseCause) {
        let _ = self.tx.send(format!("closed:{:?}", cause.next));
    }
}

/// Next `n` labels from a [`Recorder`]
pub async fn next_labels(rx: &mut mpsc::UnboundedReceiver<String>, n: usize) -> Vec<String> {
    within(async {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(rx.recv().await.expect("recorder closed"));
        }
        out
    })
    .await
}
