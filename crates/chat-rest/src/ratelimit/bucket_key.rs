//! Bucket identities

use crate::request::RestRequest;
use reqwest::Method;
use std::fmt;

/// Client-assigned identity of a rate-limit domain.
///
/// Requests with the same method, route template, and major parameter share
/// a bucket until the server reveals a hash that merges buckets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    method: Method,
    template: String,
    major: Option<String>,
}

impl BucketKey {
    #[must_use]
    pub fn new(method: Method, template: impl Into<String>, major: Option<String>) -> Self {
        Self {
            method,
            template: template.into(),
            major,
        }
    }

    #[must_use]
    pub fn for_request(request: &RestRequest) -> Self {
        Self::new(
            request.method.clone(),
            request.route.template(),
            request.route.major().map(str::to_string),
        )
    }

    pub fn major(&self) -> Option<&str> {
        self.major.as_deref()
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.template)?;
        if let Some(major) = &self.major {
            write!(f, " [{major}]")?;
        }
        Ok(())
    }
}

/// Server-revealed identity: bucket hash scoped by major parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketHash {
    pub hash: String,
    pub major: Option<String>,
}

impl BucketHash {
    #[must_use]
    pub fn new(hash: impl Into<String>, major: Option<&str>) -> Self {
        Self {
            hash: hash.into(),
            major: major.map(str::to_string),
        }
    }
}

impl fmt::Display for BucketHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.major {
            Some(major) => write!(f, "{}:{major}", self.hash),
            None => f.write_str(&self.hash),
        }
    }
}
