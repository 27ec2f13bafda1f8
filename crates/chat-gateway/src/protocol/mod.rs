//! Gateway protocol definitions
//!
//! Op codes, the frame envelope, close-code classification, and typed payloads.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{describe_close, CloseAction, CloseCode};
pub use messages::{GatewayMessage, ProtocolError};
pub use opcodes::OpCode;
pub use payloads::{
    Activity, HelloPayload, IdentifyPayload, IdentifyProperties, PresenceUpdatePayload,
    ReadyPayload, RequestGuildMembersPayload, ResumePayload, Status,
};
