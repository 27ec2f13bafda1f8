//! HTTP transport

mod reqwest_transport;
mod transport;

pub use reqwest_transport::{ReqwestTransport, AUDIT_LOG_REASON_HEADER};
pub use transport::{RestResponse, RestTransport};
