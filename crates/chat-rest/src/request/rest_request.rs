//! Outbound REST request

use super::{RequestOptions, Route};
use reqwest::Method;
use serde::Serialize;

/// One call to the REST channel
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub route: Route,
    pub body: Option<serde_json::Value>,
    pub options: RequestOptions,
}

impl RestRequest {
    #[must_use]
    pub fn new(method: Method, route: Route) -> Self {
        Self {
            method,
            route,
            body: None,
            options: RequestOptions::default(),
        }
    }

    #[must_use]
    pub fn get(route: Route) -> Self {
        Self::new(Method::GET, route)
    }

    #[must_use]
    pub fn post(route: Route) -> Self {
        Self::new(Method::POST, route)
    }

    #[must_use]
    pub fn patch(route: Route) -> Self {
        Self::new(Method::PATCH, route)
    }

    #[must_use]
    pub fn put(route: Route) -> Self {
        Self::new(Method::PUT, route)
    }

    #[must_use]
    pub fn delete(route: Route) -> Self {
        Self::new(Method::DELETE, route)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

impl std::fmt::Display for RestRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.route)
    }
}
