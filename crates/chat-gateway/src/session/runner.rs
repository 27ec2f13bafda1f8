//! Session task and its handle
//!
//! One task per session multiplexes the transport's inbound events, the
//! heartbeat interval, the reconnect timer and shutdown. An identify or
//! resume held back by its rate limit is polled from the same loop, so it
//! never stalls heartbeats. Each input goes through
//! [`SessionMachine::handle`]; the task only performs the effects.

use super::limits::CommandLimits;
use super::options::GatewayOptions;
use super::state::{Effect, SessionEvent, SessionMachine, SessionState};
use crate::dispatch::{Delivery, EventDispatchQueue, GatewayEvent};
use crate::protocol::{
    GatewayMessage, IdentifyPayload, OpCode, PresenceUpdatePayload, RequestGuildMembersPayload,
    ResumePayload,
};
use crate::transport::{CloseInfo, Transport, TransportEvent, TransportEvents};
use chat_cache::DedupeSet;
use chat_common::{ClientError, ClientResult};
use chat_rest::GlobalGate;
use futures::FutureExt;
use governor::DefaultDirectRateLimiter;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// State shared between the session task and its handles
struct Shared {
    transport: Arc<dyn Transport>,
    state: watch::Sender<SessionState>,
    latency: Mutex<Option<Duration>>,
    fatal_reason: Mutex<Option<String>>,
    gate: Arc<GlobalGate>,
    limits: CommandLimits,
    /// Replaced on every new connection
    commands: RwLock<Arc<DefaultDirectRateLimiter>>,
    identify: DefaultDirectRateLimiter,
    shutdown: CancellationToken,
}

impl Shared {
    fn command_limiter(&self) -> Arc<DefaultDirectRateLimiter> {
        Arc::clone(&self.commands.read())
    }

    fn reset_command_limiter(&self) {
        *self.commands.write() = Arc::new(self.limits.command_limiter());
    }

    /// Global gate, then the per-connection command quota
    async fn throttle_command(&self) {
        self.gate.wait_open().await;
        self.command_limiter().until_ready().await;
    }
}

/// Frame sent once its throttle wait completes
enum HandshakeFrame {
    Identify,
    Resume { session_id: String, sequence: u64 },
}

/// Identify or resume held back by the identify spacing or the global gate.
///
/// Polled from the session loop so heartbeats and reads continue while it waits.
struct PendingHandshake {
    frame: HandshakeFrame,
    wait: Pin<Box<dyn Future<Output = ()> + Send>>,
}

/// The gateway session task
pub struct GatewaySession {
    machine: SessionMachine,
    shared: Arc<Shared>,
    identify: IdentifyPayload,
    dispatch: EventDispatchQueue,
    dedupe: DedupeSet,
    events: Option<TransportEvents>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Instant>,
    handshake: Option<PendingHandshake>,
}

impl GatewaySession {
    /// Start connecting in a background task.
    ///
    /// `gate` is shared with the REST queue so a global rate limit also
    /// holds back gateway commands.
    pub fn start(
        options: GatewayOptions,
        transport: Arc<dyn Transport>,
        dispatch: EventDispatchQueue,
        gate: Arc<GlobalGate>,
    ) -> GatewayHandle {
        let mut machine = SessionMachine::new(
            options.url,
            options.backoff,
            options.max_reconnect_failures,
        );
        let initial = machine.handle(SessionEvent::Connect);
        let (state, _) = watch::channel(machine.state());

        let shared = Arc::new(Shared {
            transport,
            state,
            latency: Mutex::new(None),
            fatal_reason: Mutex::new(None),
            gate,
            commands: RwLock::new(Arc::new(options.limits.command_limiter())),
            identify: options.limits.identify_limiter(),
            limits: options.limits,
            shutdown: CancellationToken::new(),
        });

        let session = Self {
            machine,
            shared: Arc::clone(&shared),
            identify: options.identify,
            dispatch,
            dedupe: DedupeSet::new(options.dedupe_capacity),
            events: None,
            heartbeat: None,
            reconnect_at: None,
            handshake: None,
        };
        let task = tokio::spawn(session.run(initial));

        GatewayHandle {
            shared,
            task: Arc::new(tokio::sync::Mutex::new(Some(task))),
        }
    }

    async fn run(mut self, initial: Vec<Effect>) {
        self.perform_all(initial).await;

        while !self.machine.state().is_stopped() {
            let event = tokio::select! {
                biased;

                () = self.shared.shutdown.cancelled() => SessionEvent::Shutdown,

                () = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    SessionEvent::ReconnectDue
                }

                () = next_tick(&mut self.heartbeat) => SessionEvent::HeartbeatTick,

                frame = handshake_ready(&mut self.handshake) => {
                    match self.send_handshake(frame).await {
                        Some(event) => event,
                        None => continue,
                    }
                }

                incoming = next_event(&mut self.events) => match incoming {
                    Some(TransportEvent::Message(bytes)) => match decode(&bytes) {
                        Some(event) => event,
                        None => continue,
                    },
                    Some(TransportEvent::Closed(info)) => {
                        self.events = None;
                        SessionEvent::Closed(info)
                    }
                    None => {
                        self.events = None;
                        SessionEvent::Closed(CloseInfo::new(None, "transport dropped"))
                    }
                },
            };

            self.apply(event).await;
        }

        tracing::debug!(state = %self.machine.state(), "Gateway session task exiting");
        self.dispatch.close().await;
    }

    /// Feed one input through the machine, following up on effects that produce new inputs
    async fn apply(&mut self, event: SessionEvent) {
        let mut inputs = VecDeque::from([event]);
        while let Some(input) = inputs.pop_front() {
            let effects = self.machine.handle(input);
            self.publish();
            for effect in effects {
                if let Some(next) = self.perform(effect).await {
                    inputs.push_back(next);
                }
            }
        }
    }

    async fn perform_all(&mut self, effects: Vec<Effect>) {
        self.publish();
        for effect in effects {
            if let Some(next) = self.perform(effect).await {
                self.apply(next).await;
            }
        }
    }

    fn publish(&self) {
        *self.shared.latency.lock() = self.machine.latency();
        if let Some(reason) = self.machine.fatal_reason() {
            self.shared
                .fatal_reason
                .lock()
                .get_or_insert_with(|| reason.to_string());
        }

        let state = self.machine.state();
        self.shared.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    async fn perform(&mut self, effect: Effect) -> Option<SessionEvent> {
        match effect {
            Effect::Open { url } => {
                tracing::debug!(url = %url, "Opening gateway connection");
                let result = tokio::select! {
                    () = self.shared.shutdown.cancelled() => return Some(SessionEvent::Shutdown),
                    result = self.shared.transport.connect(&url) => result,
                };
                match result {
                    Ok(events) => {
                        self.events = Some(events);
                        self.shared.reset_command_limiter();
                        Some(SessionEvent::Opened)
                    }
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Gateway connect failed");
                        Some(SessionEvent::ConnectFailed(e.to_string()))
                    }
                }
            }

            Effect::Identify => {
                let shared = Arc::clone(&self.shared);
                self.hold_handshake(
                    HandshakeFrame::Identify,
                    Box::pin(async move {
                        shared.identify.until_ready().await;
                        shared.throttle_command().await;
                    }),
                )
                .await
            }

            Effect::Resume {
                session_id,
                sequence,
            } => {
                let shared = Arc::clone(&self.shared);
                self.hold_handshake(
                    HandshakeFrame::Resume {
                        session_id,
                        sequence,
                    },
                    Box::pin(async move { shared.throttle_command().await }),
                )
                .await
            }

            Effect::Heartbeat { sequence } => {
                tracing::trace!(seq = ?sequence, "Sending heartbeat");
                self.send_frame(Ok(GatewayMessage::heartbeat(sequence))).await
            }

            Effect::StartHeartbeat(interval) => {
                let offset = interval.mul_f64(rand::random::<f64>());
                let mut ticker = interval_at(Instant::now() + offset, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(ticker);
                None
            }

            Effect::StopHeartbeat => {
                self.heartbeat = None;
                None
            }

            Effect::CloseTransport(code) => {
                self.events = None;
                if self.handshake.take().is_some() {
                    tracing::debug!("Dropping handshake still waiting on its rate limit");
                }
                self.shared.transport.disconnect(code).await;
                None
            }

            Effect::ScheduleReconnect(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }

            Effect::Deliver(event) => {
                if let Some(key) = event.dedupe_key() {
                    if !self.dedupe.try_add(key) {
                        tracing::debug!(event = %event.kind, seq = ?event.sequence, "Dropping redelivered event");
                        return None;
                    }
                }
                self.dispatch.push(Delivery::Event(event)).await;
                None
            }

            Effect::Connected { resumed } => {
                self.dispatch.push(Delivery::Connected { resumed }).await;
                None
            }

            Effect::Disconnected(cause) => {
                self.dispatch.push(Delivery::Closed(cause)).await;
                None
            }

            Effect::Fatal(reason) => {
                tracing::debug!(reason = %reason, "Session reached Fatal");
                None
            }
        }
    }

    /// Send now if the throttle is already clear, otherwise park the frame for the session loop
    async fn hold_handshake(
        &mut self,
        frame: HandshakeFrame,
        mut wait: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) -> Option<SessionEvent> {
        if wait.as_mut().now_or_never().is_some() {
            return self.send_handshake(frame).await;
        }
        tracing::debug!("Handshake waiting on the gateway rate limit");
        self.handshake = Some(PendingHandshake { frame, wait });
        None
    }

    async fn send_handshake(&mut self, frame: HandshakeFrame) -> Option<SessionEvent> {
        match frame {
            HandshakeFrame::Identify => {
                tracing::debug!(shard = ?self.identify.shard, "Identifying");
                self.send_frame(GatewayMessage::identify(&self.identify)).await
            }
            HandshakeFrame::Resume {
                session_id,
                sequence,
            } => {
                tracing::debug!(session_id = %session_id, seq = sequence, "Resuming");
                let payload = ResumePayload {
                    token: self.identify.token.clone(),
                    session_id,
                    seq: sequence,
                };
                self.send_frame(GatewayMessage::resume(&payload)).await
            }
        }
    }

    async fn send_frame(
        &mut self,
        frame: Result<GatewayMessage, serde_json::Error>,
    ) -> Option<SessionEvent> {
        let json = match frame.and_then(|message| message.to_json()) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode gateway frame");
                return None;
            }
        };

        match self.shared.transport.send(json.into_bytes(), true).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Gateway send failed");
                Some(SessionEvent::Closed(CloseInfo::new(None, e.to_string())))
            }
        }
    }
}

/// Turn one inbound message into a machine input; bad frames are logged and dropped
fn decode(bytes: &[u8]) -> Option<SessionEvent> {
    let message = match GatewayMessage::from_slice(bytes) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping gateway frame");
            return None;
        }
    };
    tracing::trace!(frame = %message, "Received gateway frame");

    match message.op {
        OpCode::Dispatch => {
            let ready = if message.event_type() == Some("READY") {
                match message.as_ready() {
                    Ok(ready) => Some(ready),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed READY");
                        return None;
                    }
                }
            } else {
                None
            };
            let Some(kind) = message.t else {
                tracing::warn!("Dropping dispatch without an event type");
                return None;
            };
            let event = GatewayEvent::new(kind, message.s, message.d.unwrap_or(Value::Null));
            Some(SessionEvent::Dispatch { event, ready })
        }
        OpCode::Heartbeat => Some(SessionEvent::HeartbeatRequested),
        OpCode::HeartbeatAck => Some(SessionEvent::HeartbeatAck),
        OpCode::Reconnect => Some(SessionEvent::ReconnectRequested),
        OpCode::InvalidSession => Some(SessionEvent::InvalidSession {
            resumable: message.invalid_session_resumable(),
        }),
        OpCode::Hello => match message.as_hello() {
            Ok(hello) => Some(SessionEvent::Hello(hello.interval())),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed Hello");
                None
            }
        },
        op => {
            tracing::warn!(op = %op, "Dropping client opcode sent by server");
            None
        }
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Resolves with the parked frame once its wait is over; pending when nothing is parked
async fn handshake_ready(pending: &mut Option<PendingHandshake>) -> HandshakeFrame {
    let Some(handshake) = pending.as_mut() else {
        return std::future::pending().await;
    };
    handshake.wait.as_mut().await;
    match pending.take() {
        Some(handshake) => handshake.frame,
        None => std::future::pending().await,
    }
}

async fn next_event(events: &mut Option<TransportEvents>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Cloneable control surface of a running session
#[derive(Clone)]
pub struct GatewayHandle {
    shared: Arc<Shared>,
    task: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl GatewayHandle {
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        *self.shared.latency.lock()
    }

    pub fn fatal_reason(&self) -> Option<String> {
        self.shared.fatal_reason.lock().clone()
    }

    /// Wait for Ready; fails once the session is Fatal or shut down
    pub async fn wait_until_ready(&self) -> ClientResult<()> {
        let mut rx = self.watch_state();
        let state = rx
            .wait_for(|s| {
                matches!(
                    s,
                    SessionState::Ready | SessionState::Fatal | SessionState::Disconnected
                )
            })
            .await
            .map_or(SessionState::Disconnected, |s| *s);

        match state {
            SessionState::Ready => Ok(()),
            SessionState::Fatal => Err(ClientError::SessionFatal(
                self.fatal_reason()
                    .unwrap_or_else(|| "session failed".to_string()),
            )),
            _ => Err(ClientError::transport_closed("session closed")),
        }
    }

    /// Wait for the session task to stop; returns the final state
    pub async fn closed(&self) -> SessionState {
        let mut rx = self.watch_state();
        rx.wait_for(|s| s.is_stopped())
            .await
            .map_or(SessionState::Disconnected, |s| *s)
    }

    /// Send a raw frame once the session is Ready.
    ///
    /// Rate-limited opcodes wait on the global gate and the command quota.
    pub async fn send(&self, message: GatewayMessage) -> ClientResult<()> {
        self.wait_until_ready().await?;
        if message.op.is_rate_limited_command() {
            self.shared.throttle_command().await;
        }

        let json = message.to_json()?;
        tracing::trace!(op = %message.op, "Sending gateway command");
        self.shared
            .transport
            .send(json.into_bytes(), true)
            .await
            .map_err(ClientError::from)
    }

    pub async fn update_presence(&self, presence: &PresenceUpdatePayload) -> ClientResult<()> {
        self.send(GatewayMessage::presence_update(presence)?).await
    }

    pub async fn request_guild_members(
        &self,
        request: &RequestGuildMembersPayload,
    ) -> ClientResult<()> {
        self.send(GatewayMessage::request_guild_members(request)?)
            .await
    }

    /// Close the connection and stop the session task
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Gateway session task failed");
            }
        }
    }
}

impl std::fmt::Debug for GatewayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHandle")
            .field("state", &self.state())
            .field("latency", &self.latency())
            .finish()
    }
}
