//! Rate limiting: global gate, per-domain buckets, and the request queue

mod bucket;
mod bucket_key;
mod global_gate;
mod info;
mod queue;
mod wait;

pub use bucket::{Admission, RequestBucket, DEFAULT_PREEMPTIVE_BACKOFF};
pub use bucket_key::{BucketHash, BucketKey};
pub use global_gate::{GlobalGate, GLOBAL_BUCKET};
pub use info::RateLimitInfo;
pub use queue::RequestQueue;
pub use wait::AdmissionContext;

pub(crate) use wait::CloseSignal;
