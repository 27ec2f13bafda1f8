//! # chat-rest
//!
//! Request/response channel to the chat service.
//!
//! ## Features
//!
//! - **Global gate**: Blocks every submission while a global rate limit is active
//! - **Buckets**: Per-endpoint admission counters that learn limits from response headers
//! - **Bucket merging**: Endpoints the server reports under one hash share one counter
//! - **Retry policy**: Per-request deadline, cancellation, and retry flags
//!
//! ## Example
//!
//! ```ignore
//! use chat_rest::{RestClient, Route};
//!
//! let rest = RestClient::new(&config.rest, &config.auth.token)?;
//! let channel: serde_json::Value = rest
//!     .get(Route::new("/channels/{}", &[&channel_id]))
//!     .await?;
//! ```

pub mod client;
pub mod http;
pub mod ratelimit;
pub mod request;

pub use client::RestClient;
pub use http::{ReqwestTransport, RestResponse, RestTransport};
pub use ratelimit::{
    Admission, AdmissionContext, BucketHash, BucketKey, GlobalGate, RateLimitInfo, RequestBucket,
    RequestQueue, DEFAULT_PREEMPTIVE_BACKOFF, GLOBAL_BUCKET,
};
pub use request::{RequestOptions, RestRequest, RetryMode, Route, DEFAULT_REQUEST_TIMEOUT};
