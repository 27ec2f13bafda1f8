//! Typed front door to the request queue

use crate::http::{ReqwestTransport, RestResponse, RestTransport};
use crate::ratelimit::{GlobalGate, RequestQueue};
use crate::request::{RequestOptions, RestRequest, RetryMode, Route};
use chat_common::{ClientResult, RestConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// REST client applying configured defaults to every request
#[derive(Debug, Clone)]
pub struct RestClient {
    queue: Arc<RequestQueue>,
    timeout: Duration,
    retry: RetryMode,
}

impl RestClient {
    /// Client over a reqwest transport built from `config`
    pub fn new(config: &RestConfig, token: &str) -> ClientResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(config, token)?);
        Ok(Self::with_transport(config, transport))
    }

    #[must_use]
    pub fn with_transport(config: &RestConfig, transport: Arc<dyn RestTransport>) -> Self {
        Self {
            queue: Arc::new(RequestQueue::from_config(config, transport)),
            timeout: config.request_timeout(),
            retry: config.retry.into(),
        }
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn global_gate(&self) -> &Arc<GlobalGate> {
        self.queue.global_gate()
    }

    /// Options carrying the configured timeout and retry policy
    #[must_use]
    pub fn default_options(&self) -> RequestOptions {
        RequestOptions::new(self.timeout, self.retry)
    }

    /// Submit as-is and return the raw response
    pub async fn send(&self, request: RestRequest) -> ClientResult<RestResponse> {
        self.queue.submit(request).await
    }

    /// Submit and decode the JSON response
    pub async fn request<T: DeserializeOwned>(&self, request: RestRequest) -> ClientResult<T> {
        self.send(request).await?.json()
    }

    pub async fn get<T: DeserializeOwned>(&self, route: Route) -> ClientResult<T> {
        let request = RestRequest::get(route).with_options(self.default_options());
        self.request(request).await
    }

    pub async fn post<B, T>(&self, route: Route, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = RestRequest::post(route)
            .json(body)?
            .with_options(self.default_options());
        self.request(request).await
    }

    pub async fn patch<B, T>(&self, route: Route, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = RestRequest::patch(route)
            .json(body)?
            .with_options(self.default_options());
        self.request(request).await
    }

    pub async fn delete(&self, route: Route) -> ClientResult<()> {
        let request = RestRequest::delete(route).with_options(self.default_options());
        self.send(request).await.map(|_| ())
    }
}
