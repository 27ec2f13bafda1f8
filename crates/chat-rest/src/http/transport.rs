//! Transport seam between the request queue and the network

use crate::ratelimit::RateLimitInfo;
use crate::request::RestRequest;
use async_trait::async_trait;
use chat_common::{ClientError, ClientResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// A completed HTTP exchange
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub rate_limit: RateLimitInfo,
    pub body: Vec<u8>,
}

/// Error body returned by the service on non-2xx responses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

impl RestResponse {
    #[must_use]
    pub fn new(status: u16, rate_limit: RateLimitInfo, body: Vec<u8>) -> Self {
        Self {
            status,
            rate_limit,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// 502-class: bad gateway, unavailable, gateway timeout
    pub fn is_bad_gateway(&self) -> bool {
        matches!(self.status, 502..=504)
    }

    /// Decode a JSON body; an empty body decodes as JSON `null`
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        if self.body.is_empty() {
            return Ok(serde_json::from_slice(b"null")?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Typed failure for a non-2xx response
    #[must_use]
    pub fn to_error(&self) -> ClientError {
        let parsed = serde_json::from_slice::<ErrorBody>(&self.body).ok();
        let code = parsed.as_ref().and_then(|body| body.code);
        let reason = parsed
            .and_then(|body| body.message)
            .or_else(|| {
                reqwest::StatusCode::from_u16(self.status)
                    .ok()
                    .and_then(|status| status.canonical_reason())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Unknown error".to_string());

        ClientError::ServerError {
            status: self.status,
            code,
            reason,
        }
    }
}

/// Sends one request and returns the raw response.
///
/// Implementations do not interpret status codes or rate limits; the queue
/// does that.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn execute(&self, request: &RestRequest) -> ClientResult<RestResponse>;
}
