//! Request description types

mod options;
mod rest_request;
mod route;

pub use options::{RequestOptions, RetryMode, DEFAULT_REQUEST_TIMEOUT};
pub use rest_request::RestRequest;
pub use route::Route;
