//! Request queue: global gate, bucket registry, and the submit loop

use super::{
    AdmissionContext, BucketHash, BucketKey, CloseSignal, GlobalGate, RateLimitInfo,
    RequestBucket, DEFAULT_PREEMPTIVE_BACKOFF, GLOBAL_BUCKET,
};
use crate::http::{RestResponse, RestTransport};
use crate::request::{RestRequest, RetryMode};
use chat_common::{ClientError, ClientResult, RestConfig};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Upper bound on redirect chain length followed during lookup
const MAX_REDIRECT_HOPS: usize = 8;

/// 502-class responses retried per submission when the policy allows it
const MAX_BAD_GATEWAY_RETRIES: u32 = 3;

/// Registry slot: a live bucket or a shim pointing at the bucket it was merged into
#[derive(Debug)]
enum BucketEntry {
    Owned(Arc<RequestBucket>),
    RedirectedTo(BucketKey),
}

/// Routes every outbound request through the global gate and then its bucket.
///
/// Buckets are created lazily per [`BucketKey`]. When two keys report the
/// same server hash, the later one becomes a redirect to the first.
pub struct RequestQueue {
    transport: Arc<dyn RestTransport>,
    gate: Arc<GlobalGate>,
    buckets: DashMap<BucketKey, BucketEntry>,
    hashes: DashMap<BucketHash, BucketKey>,
    preemptive_backoff: Duration,
    closed: Arc<CloseSignal>,
}

impl RequestQueue {
    #[must_use]
    pub fn new(transport: Arc<dyn RestTransport>) -> Self {
        Self::with_gate(
            transport,
            Arc::new(GlobalGate::new()),
            DEFAULT_PREEMPTIVE_BACKOFF,
        )
    }

    #[must_use]
    pub fn with_gate(
        transport: Arc<dyn RestTransport>,
        gate: Arc<GlobalGate>,
        preemptive_backoff: Duration,
    ) -> Self {
        Self {
            transport,
            gate,
            buckets: DashMap::new(),
            hashes: DashMap::new(),
            preemptive_backoff,
            closed: Arc::new(CloseSignal::default()),
        }
    }

    #[must_use]
    pub fn from_config(config: &RestConfig, transport: Arc<dyn RestTransport>) -> Self {
        Self::with_gate(
            transport,
            Arc::new(GlobalGate::new()),
            config.preemptive_backoff(),
        )
    }

    /// Gate shared with gateway command sends
    pub fn global_gate(&self) -> &Arc<GlobalGate> {
        &self.gate
    }

    /// Submit a request and wait for its response or a typed failure
    pub async fn submit(&self, request: RestRequest) -> ClientResult<RestResponse> {
        if self.closed.is_closed() {
            return Err(self.closed.error());
        }

        let ctx = AdmissionContext::new(&request.options, Arc::clone(&self.closed));
        let key = BucketKey::for_request(&request);
        let mut bad_gateway_retries = 0;

        loop {
            self.gate.acquire(&ctx).await?;

            let bucket = self.resolve(&key);
            bucket.admit(&ctx).await?;

            // Merged into another bucket while this request waited
            if !Arc::ptr_eq(&bucket, &self.resolve(&key)) {
                bucket.refund();
                continue;
            }
            // Global limit tripped while this request waited on its bucket
            if !self.gate.is_open() {
                bucket.refund();
                continue;
            }

            let sent = ctx.abortable(self.transport.execute(&request)).await;
            let now = Instant::now();

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    // No response means no update is coming for this slot
                    bucket.refund();
                    if matches!(err, ClientError::Timeout)
                        && ctx.retry().contains(RetryMode::TIMEOUTS)
                    {
                        tracing::debug!(bucket = %key, "Request timed out; retrying");
                        ctx.check()?;
                        continue;
                    }
                    return Err(err);
                }
            };

            let (bucket, info) = self.apply_rate_limit(&bucket, &key, &response, now);

            if response.is_success() {
                return Ok(response);
            }

            if response.is_rate_limited() {
                let label = if info.global {
                    GLOBAL_BUCKET.to_string()
                } else {
                    bucket.label()
                };
                if ctx.retry().contains(RetryMode::RATE_LIMITS) {
                    ctx.check()?;
                    continue;
                }
                return Err(ClientError::rate_limited(label, info.backoff()));
            }

            if response.is_bad_gateway()
                && ctx.retry().contains(RetryMode::BAD_GATEWAY)
                && bad_gateway_retries < MAX_BAD_GATEWAY_RETRIES
            {
                bad_gateway_retries += 1;
                tracing::warn!(
                    bucket = %key,
                    status = response.status,
                    attempt = bad_gateway_retries,
                    "Bad gateway; retrying"
                );
                ctx.check()?;
                continue;
            }

            return Err(response.to_error());
        }
    }

    /// Feed response metadata to the bucket, merging buckets on a shared hash.
    ///
    /// Returns the bucket that absorbed the update.
    fn apply_rate_limit(
        &self,
        bucket: &Arc<RequestBucket>,
        key: &BucketKey,
        response: &RestResponse,
        now: Instant,
    ) -> (Arc<RequestBucket>, RateLimitInfo) {
        let mut info = response.rate_limit.clone();
        if response.is_rate_limited() {
            info.merge_rate_limited_body(&response.body);
        }

        let target = match &info.bucket {
            Some(hash) => self.unify(bucket, BucketHash::new(hash.as_str(), key.major())),
            None => Arc::clone(bucket),
        };

        target.update(&info, now);

        if response.is_rate_limited() {
            let retry_after = info.backoff().unwrap_or(self.preemptive_backoff);
            if info.global {
                self.gate.trip(now + retry_after);
            }
            target.rate_limited(retry_after, now);
        }

        (target, info)
    }

    /// Point `bucket` at the owner of `hash`, or register it as the owner
    fn unify(&self, bucket: &Arc<RequestBucket>, hash: BucketHash) -> Arc<RequestBucket> {
        let owner_key = self
            .hashes
            .entry(hash.clone())
            .or_insert_with(|| bucket.key().clone())
            .value()
            .clone();

        if &owner_key == bucket.key() {
            return Arc::clone(bucket);
        }

        let owner = self.resolve(&owner_key);
        if Arc::ptr_eq(&owner, bucket) {
            return owner;
        }

        self.buckets
            .insert(bucket.key().clone(), BucketEntry::RedirectedTo(owner.key().clone()));
        // The request that revealed the hash already passed through the shim
        owner.consume();

        tracing::debug!(
            bucket = %bucket.key(),
            canonical = %owner.key(),
            hash = %hash,
            "Merged rate limit buckets"
        );
        owner
    }

    /// Follow redirects to the live bucket for `key`, creating it if needed
    fn resolve(&self, key: &BucketKey) -> Arc<RequestBucket> {
        let mut current = key.clone();

        for _ in 0..MAX_REDIRECT_HOPS {
            let next = {
                let entry = self.buckets.entry(current.clone()).or_insert_with(|| {
                    tracing::trace!(bucket = %current, "Created rate limit bucket");
                    BucketEntry::Owned(Arc::new(RequestBucket::new(
                        current.clone(),
                        self.preemptive_backoff,
                    )))
                });
                match entry.value() {
                    BucketEntry::Owned(bucket) => return Arc::clone(bucket),
                    BucketEntry::RedirectedTo(target) => target.clone(),
                }
            };
            current = next;
        }

        tracing::warn!(bucket = %key, "Redirect chain too long; resetting bucket");
        let bucket = Arc::new(RequestBucket::new(key.clone(), self.preemptive_backoff));
        self.buckets
            .insert(key.clone(), BucketEntry::Owned(Arc::clone(&bucket)));
        bucket
    }

    /// Live bucket currently serving `key`
    pub fn bucket(&self, key: &BucketKey) -> Arc<RequestBucket> {
        self.resolve(key)
    }

    /// Key of the bucket that admits requests for `key`
    pub fn canonical_key(&self, key: &BucketKey) -> BucketKey {
        self.resolve(key).key().clone()
    }

    /// Registry entries, redirect shims included
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets idle for `idle` and shims whose target is gone; returns the number removed
    pub fn cleanup_stale(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();

        self.buckets.retain(|_, entry| match entry {
            BucketEntry::Owned(bucket) => {
                Arc::strong_count(bucket) > 1 || !bucket.is_idle(now, idle)
            }
            BucketEntry::RedirectedTo(_) => true,
        });

        // Shims may chain; repeat until no dangling redirect remains
        for _ in 0..MAX_REDIRECT_HOPS {
            let live: HashSet<BucketKey> = self.buckets.iter().map(|e| e.key().clone()).collect();
            let len = self.buckets.len();
            self.buckets.retain(|_, entry| match entry {
                BucketEntry::Owned(_) => true,
                BucketEntry::RedirectedTo(target) => live.contains(target),
            });
            if self.buckets.len() == len {
                break;
            }
        }

        self.hashes.retain(|_, owner| self.buckets.contains_key(owner));

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.buckets.len(), "Removed stale rate limit buckets");
        }
        removed
    }

    /// Periodically run [`cleanup_stale`](Self::cleanup_stale) until the queue is dropped or closed
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration, idle: Duration) -> JoinHandle<()> {
        let queue = Arc::downgrade(self);
        let closed = self.closed.token().clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = closed.cancelled() => break,
                }
                let Some(strong) = queue.upgrade() else {
                    break;
                };
                strong.cleanup_stale(idle);
            }
        })
    }

    /// Fail every waiting and future submission with `reason`
    pub fn close(&self, reason: ClientError) {
        tracing::info!(reason = %reason, "Closing request queue");
        self.closed.close(reason);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("buckets", &self.buckets.len())
            .field("hashes", &self.hashes.len())
            .field("closed", &self.closed.is_closed())
            .finish()
    }
}
