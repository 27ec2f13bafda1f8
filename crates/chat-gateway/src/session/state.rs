//! Session state machine
//!
//! All state lives in [`SessionMachine`] and changes only inside
//! [`SessionMachine::handle`], which maps one input to the side effects the
//! runner must perform. The machine itself does no IO.

use super::backoff::{invalid_session_wait, Backoff};
use super::heartbeat::HeartbeatTracker;
use crate::dispatch::{CloseCause, GatewayEvent, NextStep};
use crate::error::GatewayError;
use crate::protocol::{describe_close, CloseAction, ReadyPayload};
use crate::transport::CloseInfo;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Close code used when the client drops a connection it wants to resume
pub const RESUMABLE_CLOSE: u16 = 4000;

/// Normal closure; the server invalidates the session
pub const NORMAL_CLOSE: u16 = 1000;

/// Lifecycle of one logical session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Ready,
    Reconnecting,
    /// Terminal; a new session must be started explicitly
    Fatal,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::AwaitingHello => "AwaitingHello",
            Self::Identifying => "Identifying",
            Self::Resuming => "Resuming",
            Self::Ready => "Ready",
            Self::Reconnecting => "Reconnecting",
            Self::Fatal => "Fatal",
        }
    }

    /// A connection is open and past hello
    pub fn is_handshaking_or_ready(self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming | Self::Ready)
    }

    /// The runner stops in these states
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Disconnected | Self::Fatal)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input to the machine
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connect,
    Opened,
    ConnectFailed(String),
    Hello(Duration),
    Dispatch {
        event: GatewayEvent,
        ready: Option<ReadyPayload>,
    },
    HeartbeatTick,
    /// Server asked for an immediate heartbeat (op 1)
    HeartbeatRequested,
    HeartbeatAck,
    /// Server asked the client to reconnect (op 7)
    ReconnectRequested,
    InvalidSession {
        resumable: bool,
    },
    Closed(CloseInfo),
    ReconnectDue,
    Shutdown,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Open { url: String },
    Identify,
    Resume { session_id: String, sequence: u64 },
    Heartbeat { sequence: Option<u64> },
    StartHeartbeat(Duration),
    StopHeartbeat,
    CloseTransport(u16),
    ScheduleReconnect(Duration),
    Deliver(GatewayEvent),
    Connected { resumed: bool },
    Disconnected(CloseCause),
    Fatal(String),
}

/// Session bookkeeping and the single transition function
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    gateway_url: String,
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
    /// Consecutive attempts that did not reach Ready
    failures: u32,
    max_failures: u32,
    backoff: Backoff,
    heartbeat: HeartbeatTracker,
    fatal_reason: Option<String>,
}

impl SessionMachine {
    #[must_use]
    pub fn new(gateway_url: impl Into<String>, backoff: Backoff, max_failures: u32) -> Self {
        Self {
            state: SessionState::Disconnected,
            gateway_url: gateway_url.into(),
            session_id: None,
            sequence: None,
            resume_url: None,
            failures: 0,
            max_failures: max_failures.max(1),
            backoff,
            heartbeat: HeartbeatTracker::new(),
            fatal_reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn fatal_reason(&self) -> Option<&str> {
        self.fatal_reason.as_deref()
    }

    /// A prior session can be resumed on the next handshake
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    /// Apply one input and return the effects to perform, in order
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        use SessionEvent as E;
        use SessionState as S;

        if self.state == S::Fatal {
            return Vec::new();
        }

        match (self.state, event) {
            (_, E::Shutdown) => self.shutdown(),

            (S::Disconnected, E::Connect) => {
                self.set_state(S::Connecting);
                vec![Effect::Open {
                    url: self.gateway_url.clone(),
                }]
            }

            (S::Connecting, E::Opened) => {
                self.set_state(S::AwaitingHello);
                Vec::new()
            }

            (S::Connecting, E::ConnectFailed(reason)) => {
                self.connection_lost(None, reason, CloseAction::Resume, None)
            }

            (S::AwaitingHello, E::Hello(interval)) => self.hello(interval),

            (state, E::Dispatch { event, ready }) if state.is_handshaking_or_ready() => {
                self.dispatch(event, ready)
            }

            (state, E::HeartbeatTick) if state.is_handshaking_or_ready() => {
                if self.heartbeat.is_awaiting_ack() {
                    tracing::warn!(
                        session_id = ?self.session_id,
                        "Heartbeat ack missed, treating connection as dead"
                    );
                    return self.connection_lost(
                        None,
                        "heartbeat ack timeout".to_string(),
                        CloseAction::Resume,
                        None,
                    );
                }
                self.heartbeat.record_sent(Instant::now());
                vec![Effect::Heartbeat {
                    sequence: self.sequence,
                }]
            }

            (state, E::HeartbeatRequested) if state.is_handshaking_or_ready() => {
                vec![Effect::Heartbeat {
                    sequence: self.sequence,
                }]
            }

            (_, E::HeartbeatAck) => {
                if let Some(rtt) = self.heartbeat.record_ack(Instant::now()) {
                    tracing::trace!(latency_ms = rtt.as_millis() as u64, "Heartbeat acked");
                }
                Vec::new()
            }

            (state, E::ReconnectRequested) if state.is_handshaking_or_ready() => {
                tracing::info!("Server requested reconnect");
                self.connection_lost(
                    None,
                    "server requested reconnect".to_string(),
                    CloseAction::Resume,
                    None,
                )
            }

            (state, E::InvalidSession { resumable }) if state.is_handshaking_or_ready() => {
                tracing::warn!(resumable, "Session invalidated by server");
                let action = if resumable {
                    CloseAction::Resume
                } else {
                    CloseAction::Reidentify
                };
                self.connection_lost(
                    None,
                    "invalid session".to_string(),
                    action,
                    Some(invalid_session_wait()),
                )
            }

            (S::AwaitingHello | S::Identifying | S::Resuming | S::Ready, E::Closed(info)) => {
                let action = info.code.map_or(CloseAction::Resume, CloseAction::for_code);
                self.connection_lost(info.code, info.reason, action, None)
            }

            (S::Reconnecting, E::ReconnectDue) => {
                self.set_state(S::Connecting);
                vec![Effect::Open {
                    url: self.handshake_url(),
                }]
            }

            (state, event) => {
                tracing::trace!(state = %state, event = ?event, "Ignoring event in this state");
                Vec::new()
            }
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Session state changed");
            self.state = next;
        }
    }

    fn handshake_url(&self) -> String {
        match (&self.resume_url, self.can_resume()) {
            (Some(url), true) => url.clone(),
            _ => self.gateway_url.clone(),
        }
    }

    fn forget_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_url = None;
    }

    fn hello(&mut self, interval: Duration) -> Vec<Effect> {
        self.heartbeat.start(interval);
        let mut effects = vec![Effect::StartHeartbeat(interval)];

        match (self.session_id.clone(), self.sequence) {
            (Some(session_id), Some(sequence)) => {
                self.set_state(SessionState::Resuming);
                effects.push(Effect::Resume {
                    session_id,
                    sequence,
                });
            }
            _ => {
                self.forget_session();
                self.set_state(SessionState::Identifying);
                effects.push(Effect::Identify);
            }
        }
        effects
    }

    fn dispatch(&mut self, event: GatewayEvent, ready: Option<ReadyPayload>) -> Vec<Effect> {
        if let Some(sequence) = event.sequence {
            self.sequence = Some(sequence);
        }
        if let Some(ready) = ready {
            tracing::info!(session_id = %ready.session_id, "Session ready");
            self.session_id = Some(ready.session_id);
            self.resume_url = ready.resume_gateway_url;
        }

        let mut effects = Vec::with_capacity(2);
        if matches!(
            self.state,
            SessionState::Identifying | SessionState::Resuming
        ) {
            let resumed = self.state == SessionState::Resuming;
            if resumed {
                tracing::info!(session_id = ?self.session_id, "Session resumed");
            }
            self.failures = 0;
            self.set_state(SessionState::Ready);
            effects.push(Effect::Connected { resumed });
        }
        effects.push(Effect::Deliver(event));
        effects
    }

    /// Tear down the current connection and plan the next step
    fn connection_lost(
        &mut self,
        code: Option<u16>,
        reason: String,
        action: CloseAction,
        wait: Option<Duration>,
    ) -> Vec<Effect> {
        let was_ready = self.state == SessionState::Ready;
        self.heartbeat.stop();

        let close_code = if action == CloseAction::Resume {
            RESUMABLE_CLOSE
        } else {
            NORMAL_CLOSE
        };
        let mut effects = vec![Effect::StopHeartbeat, Effect::CloseTransport(close_code)];

        if action.is_fatal() {
            let err = code.map_or(GatewayError::Closed, GatewayError::FatalClose);
            return self.enter_fatal(effects, code, &err);
        }
        if action == CloseAction::Reidentify {
            self.forget_session();
        }

        if !was_ready {
            self.failures += 1;
        }
        if self.failures >= self.max_failures {
            let err = GatewayError::ReconnectsExhausted(self.failures);
            return self.enter_fatal(effects, code, &err);
        }

        let next = if self.can_resume() {
            NextStep::Resume
        } else {
            NextStep::Reidentify
        };
        let delay = wait.unwrap_or_else(|| self.backoff.delay(self.failures));

        tracing::info!(
            code = ?code,
            reason = %reason,
            next = ?next,
            failures = self.failures,
            delay_ms = delay.as_millis() as u64,
            "Gateway connection lost"
        );

        self.set_state(SessionState::Reconnecting);
        effects.push(Effect::Disconnected(CloseCause { code, reason, next }));
        effects.push(Effect::ScheduleReconnect(delay));
        effects
    }

    fn enter_fatal(
        &mut self,
        mut effects: Vec<Effect>,
        code: Option<u16>,
        err: &GatewayError,
    ) -> Vec<Effect> {
        let reason = err.to_string();
        tracing::error!(code = ?code, reason = %reason, "Gateway session failed permanently");

        self.forget_session();
        self.fatal_reason = Some(reason.clone());
        self.set_state(SessionState::Fatal);

        effects.push(Effect::Disconnected(CloseCause {
            code,
            reason: code.map_or_else(|| reason.clone(), describe_close),
            next: NextStep::Fatal,
        }));
        effects.push(Effect::Fatal(reason));
        effects
    }

    fn shutdown(&mut self) -> Vec<Effect> {
        if self.state == SessionState::Disconnected {
            return Vec::new();
        }
        self.heartbeat.stop();
        self.forget_session();
        self.set_state(SessionState::Disconnected);
        vec![
            Effect::StopHeartbeat,
            Effect::CloseTransport(NORMAL_CLOSE),
            Effect::Disconnected(CloseCause {
                code: Some(NORMAL_CLOSE),
                reason: "shutdown".to_string(),
                next: NextStep::Shutdown,
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const URL: &str = "wss://gateway.test";
    const RESUME_URL: &str = "wss://resume.gateway.test";

    fn machine() -> SessionMachine {
        SessionMachine::new(
            URL,
            Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
            3,
        )
    }

    fn ready_event(sequence: u64) -> SessionEvent {
        let data = json!({
            "v": 10,
            "session_id": "abc",
            "resume_gateway_url": RESUME_URL,
        });
        SessionEvent::Dispatch {
            ready: Some(serde_json::from_value(data.clone()).unwrap()),
            event: GatewayEvent::new("READY", Some(sequence), data),
        }
    }

    fn message(sequence: u64) -> SessionEvent {
        SessionEvent::Dispatch {
            event: GatewayEvent::new("MESSAGE_CREATE", Some(sequence), json!({"id": "1"})),
            ready: None,
        }
    }

    fn closed(code: u16) -> SessionEvent {
        SessionEvent::Closed(CloseInfo::new(Some(code), "closed"))
    }

    /// Drive a fresh machine to Ready with the given last sequence
    fn ready_machine(sequence: u64) -> SessionMachine {
        let mut m = machine();
        m.handle(SessionEvent::Connect);
        m.handle(SessionEvent::Opened);
        m.handle(SessionEvent::Hello(Duration::from_secs(41)));
        m.handle(ready_event(1));
        if sequence > 1 {
            m.handle(message(sequence));
        }
        assert_eq!(m.state(), SessionState::Ready);
        m
    }

    fn reconnect_and_hello(m: &mut SessionMachine) -> Vec<Effect> {
        let open = m.handle(SessionEvent::ReconnectDue);
        assert!(matches!(open.as_slice(), [Effect::Open { .. }]));
        m.handle(SessionEvent::Opened);
        m.handle(SessionEvent::Hello(Duration::from_secs(41)))
    }

    #[test]
    fn test_fresh_handshake() {
        let mut m = machine();
        assert_eq!(
            m.handle(SessionEvent::Connect),
            vec![Effect::Open {
                url: URL.to_string()
            }]
        );
        assert_eq!(m.state(), SessionState::Connecting);

        assert!(m.handle(SessionEvent::Opened).is_empty());
        assert_eq!(m.state(), SessionState::AwaitingHello);

        let effects = m.handle(SessionEvent::Hello(Duration::from_millis(41_250)));
        assert_eq!(
            effects,
            vec![
                Effect::StartHeartbeat(Duration::from_millis(41_250)),
                Effect::Identify
            ]
        );
        assert_eq!(m.state(), SessionState::Identifying);

        let effects = m.handle(ready_event(1));
        assert!(matches!(effects[0], Effect::Connected { resumed: false }));
        assert!(matches!(&effects[1], Effect::Deliver(e) if e.kind == "READY"));
        assert_eq!(m.state(), SessionState::Ready);
        assert_eq!(m.session_id(), Some("abc"));
        assert_eq!(m.sequence(), Some(1));
    }

    #[test]
    fn test_resumable_close_resumes_with_last_sequence() {
        let mut m = ready_machine(42);

        let effects = m.handle(closed(1006));
        assert_eq!(m.state(), SessionState::Reconnecting);
        assert!(effects.contains(&Effect::ScheduleReconnect(Duration::ZERO)));
        assert!(effects.iter().any(
            |e| matches!(e, Effect::Disconnected(cause) if cause.next == NextStep::Resume)
        ));

        let open = m.handle(SessionEvent::ReconnectDue);
        assert_eq!(
            open,
            vec![Effect::Open {
                url: RESUME_URL.to_string()
            }]
        );
        m.handle(SessionEvent::Opened);
        let effects = m.handle(SessionEvent::Hello(Duration::from_secs(41)));
        assert!(effects.contains(&Effect::Resume {
            session_id: "abc".to_string(),
            sequence: 42
        }));
        assert_eq!(m.state(), SessionState::Resuming);

        let effects = m.handle(SessionEvent::Dispatch {
            event: GatewayEvent::new("RESUMED", Some(43), json!({})),
            ready: None,
        });
        assert!(effects.contains(&Effect::Connected { resumed: true }));
        assert_eq!(m.sequence(), Some(43));
    }

    #[test]
    fn test_invalid_sequence_close_forces_identify() {
        let mut m = ready_machine(42);
        let effects = m.handle(closed(4007));
        assert!(effects.contains(&Effect::CloseTransport(NORMAL_CLOSE)));
        assert!(m.session_id().is_none());
        assert!(m.sequence().is_none());

        let open = m.handle(SessionEvent::ReconnectDue);
        assert_eq!(
            open,
            vec![Effect::Open {
                url: URL.to_string()
            }]
        );
        m.handle(SessionEvent::Opened);
        let effects = m.handle(SessionEvent::Hello(Duration::from_secs(41)));
        assert!(effects.contains(&Effect::Identify));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Resume { .. })));
    }

    #[test]
    fn test_auth_failure_is_fatal() {
        let mut m = ready_machine(5);
        let effects = m.handle(closed(4004));
        assert_eq!(m.state(), SessionState::Fatal);
        assert!(matches!(effects.last(), Some(Effect::Fatal(reason)) if reason.contains("4004")));
        assert!(effects.iter().any(
            |e| matches!(e, Effect::Disconnected(cause) if cause.next == NextStep::Fatal)
        ));
        assert!(m.fatal_reason().is_some());

        // Terminal: nothing moves it
        assert!(m.handle(SessionEvent::Connect).is_empty());
        assert!(m.handle(SessionEvent::ReconnectDue).is_empty());
        assert!(m.handle(SessionEvent::Shutdown).is_empty());
        assert_eq!(m.state(), SessionState::Fatal);
    }

    #[test]
    fn test_missed_ack_reconnects_within_one_tick() {
        let mut m = ready_machine(7);
        assert_eq!(
            m.handle(SessionEvent::HeartbeatTick),
            vec![Effect::Heartbeat { sequence: Some(7) }]
        );

        let effects = m.handle(SessionEvent::HeartbeatTick);
        assert_eq!(m.state(), SessionState::Reconnecting);
        assert!(effects.contains(&Effect::CloseTransport(RESUMABLE_CLOSE)));
        assert!(effects.contains(&Effect::StopHeartbeat));
        assert!(m.can_resume());
    }

    #[test]
    fn test_ack_keeps_session_alive() {
        let mut m = ready_machine(7);
        for _ in 0..5 {
            m.handle(SessionEvent::HeartbeatTick);
            m.handle(SessionEvent::HeartbeatAck);
        }
        assert_eq!(m.state(), SessionState::Ready);
        assert!(m.latency().is_some());
    }

    #[test]
    fn test_server_heartbeat_request_answered_immediately() {
        let mut m = ready_machine(9);
        assert_eq!(
            m.handle(SessionEvent::HeartbeatRequested),
            vec![Effect::Heartbeat { sequence: Some(9) }]
        );
    }

    #[test]
    fn test_reconnect_request_resumes() {
        let mut m = ready_machine(3);
        m.handle(SessionEvent::ReconnectRequested);
        assert_eq!(m.state(), SessionState::Reconnecting);
        let effects = reconnect_and_hello(&mut m);
        assert!(matches!(effects.last(), Some(Effect::Resume { sequence: 3, .. })));
    }

    #[test]
    fn test_invalid_session_waits_then_identifies() {
        let mut m = ready_machine(3);
        let effects = m.handle(SessionEvent::InvalidSession { resumable: false });
        let delay = effects.iter().find_map(|e| match e {
            Effect::ScheduleReconnect(d) => Some(*d),
            _ => None,
        });
        let delay = delay.unwrap();
        assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(5));

        let effects = reconnect_and_hello(&mut m);
        assert!(effects.contains(&Effect::Identify));
    }

    #[test]
    fn test_repeated_failures_escalate_to_fatal() {
        let mut m = machine();
        m.handle(SessionEvent::Connect);

        let effects = m.handle(SessionEvent::ConnectFailed("refused".to_string()));
        assert_eq!(m.state(), SessionState::Reconnecting);
        let delay = effects.iter().find_map(|e| match e {
            Effect::ScheduleReconnect(d) => Some(*d),
            _ => None,
        });
        assert!(delay.unwrap() <= Duration::from_secs(1));

        m.handle(SessionEvent::ReconnectDue);
        m.handle(SessionEvent::ConnectFailed("refused".to_string()));
        assert_eq!(m.failures(), 2);

        m.handle(SessionEvent::ReconnectDue);
        let effects = m.handle(SessionEvent::ConnectFailed("refused".to_string()));
        assert_eq!(m.state(), SessionState::Fatal);
        assert!(matches!(effects.last(), Some(Effect::Fatal(reason)) if reason.contains('3')));
    }

    #[test]
    fn test_ready_resets_failure_count() {
        let mut m = machine();
        m.handle(SessionEvent::Connect);
        m.handle(SessionEvent::ConnectFailed("refused".to_string()));
        m.handle(SessionEvent::ReconnectDue);
        m.handle(SessionEvent::Opened);
        m.handle(SessionEvent::Hello(Duration::from_secs(41)));
        m.handle(ready_event(1));
        assert_eq!(m.failures(), 0);
    }

    #[test]
    fn test_stale_close_ignored_while_reconnecting() {
        let mut m = ready_machine(2);
        m.handle(closed(1001));
        assert!(m.handle(closed(1006)).is_empty());
        assert_eq!(m.state(), SessionState::Reconnecting);
    }

    #[test]
    fn test_shutdown_discards_session() {
        let mut m = ready_machine(2);
        let effects = m.handle(SessionEvent::Shutdown);
        assert_eq!(m.state(), SessionState::Disconnected);
        assert!(effects.contains(&Effect::CloseTransport(NORMAL_CLOSE)));
        assert!(!m.can_resume());
        assert!(m.handle(SessionEvent::Shutdown).is_empty());
    }

    #[test]
    fn test_dispatch_before_hello_dropped() {
        let mut m = machine();
        m.handle(SessionEvent::Connect);
        m.handle(SessionEvent::Opened);
        assert!(m.handle(message(1)).is_empty());
        assert_eq!(m.sequence(), None);
    }
}
