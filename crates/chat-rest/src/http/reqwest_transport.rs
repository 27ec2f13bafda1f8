//! HTTP transport backed by reqwest

use super::{RestResponse, RestTransport};
use crate::ratelimit::RateLimitInfo;
use crate::request::RestRequest;
use async_trait::async_trait;
use chat_common::{ClientError, ClientResult, RestConfig};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};

/// Header carrying the audit-log reason of a request
pub const AUDIT_LOG_REASON_HEADER: &str = "x-audit-log-reason";

/// Transport that talks to the real service
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Build a client with the token baked into default headers
    pub fn new(config: &RestConfig, token: &str) -> ClientResult<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|_| ClientError::Config("token contains invalid header characters".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("chat-client/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Http(e.to_string()))?;

        Ok(Self::with_client(client, config.base_url.clone()))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn map_reqwest_error(err: &reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Http(err.to_string())
    }
}

#[async_trait]
impl RestTransport for ReqwestTransport {
    async fn execute(&self, request: &RestRequest) -> ClientResult<RestResponse> {
        let url = format!("{}{}", self.base_url, request.route.path());
        let mut builder = self.client.request(request.method.clone(), &url);

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(reason) = &request.options.reason {
            builder = builder.header(AUDIT_LOG_REASON_HEADER, reason);
        }

        tracing::trace!(method = %request.method, url = %url, "Sending request");
        let response = builder.send().await.map_err(|e| map_reqwest_error(&e))?;

        let status = response.status().as_u16();
        let rate_limit = RateLimitInfo::from_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(&e))?
            .to_vec();

        tracing::trace!(method = %request.method, url = %url, status, "Received response");
        Ok(RestResponse::new(status, rate_limit, body))
    }
}
