//! Gateway session: state machine, heartbeat, reconnect policy and the task that drives them

mod backoff;
mod heartbeat;
mod limits;
mod options;
mod runner;
mod state;

pub use backoff::{invalid_session_wait, Backoff, INVALID_SESSION_WAIT};
pub use heartbeat::HeartbeatTracker;
pub use limits::{CommandLimits, COMMANDS_PER_MINUTE, IDENTIFIES_PER_MINUTE};
pub use options::GatewayOptions;
pub use runner::{GatewayHandle, GatewaySession};
pub use state::{Effect, SessionEvent, SessionMachine, SessionState, NORMAL_CLOSE, RESUMABLE_CLOSE};
