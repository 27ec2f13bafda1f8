//! Rate-limit metadata carried by a response

use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::Duration;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const HEADER_BUCKET: &str = "x-ratelimit-bucket";
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// The rate-limit values a response can carry.
///
/// Every field is optional; a response with none of them set marks its
/// bucket as unlimited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    /// Window size
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    /// Server-assigned bucket identity
    pub bucket: Option<String>,
    pub global: bool,
    /// Only present on 429 responses
    pub retry_after: Option<Duration>,
}

/// Body of a 429 response
#[derive(Debug, Deserialize)]
struct RateLimitedBody {
    retry_after: f64,
    #[serde(default)]
    global: bool,
}

impl RateLimitInfo {
    /// Read the rate-limit headers; malformed values are treated as absent
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        Self {
            limit: text(HEADER_LIMIT).and_then(|v| v.parse().ok()),
            remaining: text(HEADER_REMAINING).and_then(|v| v.parse().ok()),
            reset_after: text(HEADER_RESET_AFTER).and_then(parse_seconds),
            bucket: text(HEADER_BUCKET).map(str::to_string),
            global: text(HEADER_GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
            retry_after: text(HEADER_RETRY_AFTER).and_then(parse_seconds),
        }
    }

    /// Fill `retry_after`/`global` from a 429 JSON body when headers lacked them
    pub fn merge_rate_limited_body(&mut self, body: &[u8]) {
        if let Ok(parsed) = serde_json::from_slice::<RateLimitedBody>(body) {
            if self.retry_after.is_none() {
                self.retry_after = duration_from_secs(parsed.retry_after);
            }
            self.global |= parsed.global;
        }
    }

    /// Whether the response said anything about rate limits at all
    #[must_use]
    pub fn has_metadata(&self) -> bool {
        self.limit.is_some()
            || self.remaining.is_some()
            || self.reset_after.is_some()
            || self.bucket.is_some()
            || self.retry_after.is_some()
            || self.global
    }

    /// How long a 429 asks the client to back off
    #[must_use]
    pub fn backoff(&self) -> Option<Duration> {
        self.retry_after.or(self.reset_after)
    }
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    raw.trim().parse::<f64>().ok().and_then(duration_from_secs)
}

fn duration_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}
