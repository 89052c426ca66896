//! Token bucket rate limiting for notifiers.
//!
//! A full `notify` call consumes one token no matter how many alerts it
//! carries. Limits are re-read from their source only once the recheck
//! deadline has passed.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::domain::{Alert, NotifyContext};
use crate::error::NotifyError;
use crate::integrations::{Metadata, Notifier};
use crate::observability::NOTIFICATIONS_RATE_LIMITED;

/// Events per second and bucket size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimits {
    pub limit: f64,
    pub burst: u32,
}

/// Where a limiter reads its limits from.
pub trait LimitsSource: Send + Sync {
    /// Per-integration limits, falling back to the per-type default.
    fn limits(&self, meta: &Metadata) -> Option<RateLimits>;

    fn recheck_interval(&self) -> Duration;
}

impl LimitsSource for RateLimitConfig {
    fn limits(&self, meta: &Metadata) -> Option<RateLimits> {
        self.for_integration(&meta.uid)
            .or_else(|| self.for_type(&meta.integration_type))
    }

    fn recheck_interval(&self) -> Duration {
        RateLimitConfig::recheck_interval(self)
    }
}

/// Limits the host may replace at runtime.
impl<T: LimitsSource> LimitsSource for RwLock<T> {
    fn limits(&self, meta: &Metadata) -> Option<RateLimits> {
        self.read().limits(meta)
    }

    fn recheck_interval(&self) -> Duration {
        self.read().recheck_interval()
    }
}

/// Fixed limits resolved once by the caller.
#[derive(Debug, Clone, Copy)]
pub struct StaticLimits {
    pub per_integration: Option<RateLimits>,
    pub per_type_default: Option<RateLimits>,
    pub recheck: Duration,
}

impl LimitsSource for StaticLimits {
    fn limits(&self, _meta: &Metadata) -> Option<RateLimits> {
        self.per_integration.or(self.per_type_default)
    }

    fn recheck_interval(&self) -> Duration {
        self.recheck
    }
}

#[derive(Debug)]
struct TokenBucket {
    limit: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(limits: RateLimits, now: Instant) -> Self {
        Self {
            limit: limits.limit,
            burst: limits.burst as f64,
            tokens: limits.burst as f64,
            last: now,
        }
    }

    fn advance(&mut self, now: Instant) {
        if now > self.last {
            let elapsed = now.duration_since(self.last).as_secs_f64();
            if self.limit > 0.0 {
                self.tokens = (self.tokens + elapsed * self.limit).min(self.burst);
            }
            self.last = now;
        }
    }

    fn allow_n(&mut self, now: Instant, n: f64) -> bool {
        if self.limit.is_infinite() {
            return true;
        }
        self.advance(now);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    fn set_limits(&mut self, now: Instant, limits: RateLimits) {
        self.advance(now);
        self.limit = limits.limit;
        self.burst = limits.burst as f64;
        self.tokens = self.tokens.min(self.burst);
    }
}

pub struct RateLimitedNotifier {
    inner: Arc<dyn Notifier>,
    meta: Metadata,
    source: Arc<dyn LimitsSource>,
    bucket: Mutex<Option<TokenBucket>>,
    epoch: Instant,
    /// Milliseconds since `epoch` at which limits are re-read.
    recheck_at: AtomicI64,
    rejected: AtomicU64,
}

impl RateLimitedNotifier {
    fn new(inner: Arc<dyn Notifier>, meta: Metadata, source: Arc<dyn LimitsSource>, limits: RateLimits) -> Self {
        let epoch = Instant::now();
        let interval = source.recheck_interval().as_millis() as i64;
        Self {
            inner,
            meta,
            source,
            bucket: Mutex::new(Some(TokenBucket::new(limits, epoch))),
            epoch,
            recheck_at: AtomicI64::new(interval),
            rejected: AtomicU64::new(0),
        }
    }

    /// Number of calls dropped by the limiter.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn maybe_recheck(&self, now: Instant) {
        let now_ms = now.duration_since(self.epoch).as_millis() as i64;
        let at = self.recheck_at.load(Ordering::Acquire);
        if now_ms < at {
            return;
        }
        let next = now_ms + self.source.recheck_interval().as_millis() as i64;
        // Only the caller that moves the deadline re-reads the limits.
        if self
            .recheck_at
            .compare_exchange(at, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let limits = self.source.limits(&self.meta);
        let mut bucket = self.bucket.lock();
        match (bucket.as_mut(), limits) {
            (Some(b), Some(l)) => b.set_limits(now, l),
            (None, Some(l)) => *bucket = Some(TokenBucket::new(l, now)),
            (_, None) => *bucket = None,
        }
        tracing::debug!(uid = %self.meta.uid, limits = ?limits, "rate limits rechecked");
    }

    fn allow(&self, now: Instant) -> bool {
        self.maybe_recheck(now);
        match self.bucket.lock().as_mut() {
            Some(bucket) => bucket.allow_n(now, 1.0),
            None => true,
        }
    }
}

#[async_trait]
impl Notifier for RateLimitedNotifier {
    async fn notify(&self, ctx: &NotifyContext, alerts: &[Alert]) -> Result<(), NotifyError> {
        if !self.allow(Instant::now()) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            NOTIFICATIONS_RATE_LIMITED
                .with_label_values(&[&self.meta.integration_type])
                .inc();
            tracing::warn!(
                integration = %self.meta.integration_type,
                uid = %self.meta.uid,
                alerts = alerts.len(),
                "notification rate limited"
            );
            return Err(NotifyError::RateLimited);
        }
        self.inner.notify(ctx, alerts).await
    }

    fn send_resolved(&self) -> bool {
        self.inner.send_resolved()
    }
}

/// Wraps `base` with the limits `source` resolves for `meta`. Without limits
/// the base notifier is returned untouched.
pub fn wrap_with_source(
    base: Arc<dyn Notifier>,
    meta: &Metadata,
    source: Arc<dyn LimitsSource>,
) -> Arc<dyn Notifier> {
    match source.limits(meta) {
        Some(limits) => Arc::new(RateLimitedNotifier::new(base, meta.clone(), source, limits)),
        None => base,
    }
}

/// Wraps `base` with an explicit per-integration limit, else the per-type default.
pub fn wrap(
    base: Arc<dyn Notifier>,
    meta: &Metadata,
    per_integration: Option<RateLimits>,
    per_type_default: Option<RateLimits>,
) -> Arc<dyn Notifier> {
    let source = StaticLimits {
        per_integration,
        per_type_default,
        recheck: Duration::from_secs(60),
    };
    wrap_with_source(base, meta, Arc::new(source))
}
