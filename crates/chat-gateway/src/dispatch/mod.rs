//! Event delivery to the application

mod event;
mod handler;
mod queue;

pub use event::{CloseCause, GatewayEvent, NextStep};
pub use handler::{EventHandler, NoopHandler};
pub use queue::{Delivery, DispatchMode, EventDispatchQueue};
