//! Admission control
//!
//! Answers "is this identifier allowed one more action right now" under a
//! sliding-window policy, backed by a shared Redis store with automatic
//! degradation to a process-local fixed-window store when the shared store
//! is unavailable.
//!
//! Availability is an explicit state machine:
//!
//! ```text
//! Unknown --probe--> Healthy <--probe/failure--> Degraded
//! ```
//!
//! The probe result is cached for a fixed interval; any runtime failure of a
//! shared-store operation flips to `Degraded` immediately and the call in
//! flight completes on the local path. Callers never see which backend
//! served them.

pub mod memory;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

/// How long a probe result stays valid before the next call re-probes
const PROBE_CACHE_INTERVAL: Duration = Duration::from_secs(60);

/// How often the sweeper prunes expired local records
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Key prefix shared by both backends
pub(crate) fn rate_limit_key(identifier: &str) -> String {
    format!("rate_limit:{identifier}")
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Slots left in the window after this decision
    pub remaining: u32,
    /// Unix milliseconds when a denied caller can expect capacity again
    pub reset_time: i64,
}

/// A rate-limit store
///
/// Implementations answer check/status/reset for one identifier; the
/// [`RateLimiter`] decides which implementation a call reaches. Injectable
/// so tests can stand in a misbehaving store.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Check and consume a slot.
    async fn check(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> Result<RateLimitDecision>;

    /// Read the window without consuming a slot.
    async fn status(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> Result<RateLimitDecision>;

    /// Clear all state for an identifier.
    async fn reset(&self, identifier: &str) -> Result<()>;

    /// Health probe; the default is always-healthy for stores with no
    /// failure mode of their own.
    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared-store availability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Not yet probed
    Unknown,
    /// Shared store reachable; sliding window in effect
    Healthy,
    /// Shared store down; local fixed window in effect
    Degraded,
}

#[derive(Debug)]
struct HealthState {
    state: Availability,
    checked_at: Option<Instant>,
}

/// Dual-backend rate limiter
pub struct RateLimiter {
    shared: Option<Box<dyn RateLimitBackend>>,
    local: Arc<MemoryBackend>,
    health: tokio::sync::Mutex<HealthState>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("shared", &self.shared.is_some())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter over an optional shared backend.
    ///
    /// With `shared = None` the limiter runs purely on the local store; this
    /// is correct, just not shared across instances.
    pub fn new(shared: Option<Box<dyn RateLimitBackend>>) -> Self {
        Self {
            shared,
            local: Arc::new(MemoryBackend::new()),
            health: tokio::sync::Mutex::new(HealthState {
                state: Availability::Unknown,
                checked_at: None,
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Current availability state (introspection/test hook).
    pub async fn availability(&self) -> Availability {
        self.health.lock().await.state
    }

    /// Check and consume a slot for the identifier.
    ///
    /// Never fails: a shared-store failure degrades to the local store for
    /// this and subsequent calls, and the result carries no trace of which
    /// backend served it.
    pub async fn check(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> RateLimitDecision {
        if let Some(shared) = &self.shared {
            if self.shared_available(shared.as_ref()).await {
                match shared.check(identifier, max_requests, window_ms).await {
                    Ok(decision) => return decision,
                    Err(e) => self.mark_degraded("check", &e).await,
                }
            }
        }

        self.local.fixed_check(identifier, max_requests, window_ms).await
    }

    /// Read-only window status for the identifier; does not consume a slot.
    pub async fn status(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> RateLimitDecision {
        if let Some(shared) = &self.shared {
            if self.shared_available(shared.as_ref()).await {
                match shared.status(identifier, max_requests, window_ms).await {
                    Ok(decision) => return decision,
                    Err(e) => self.mark_degraded("status", &e).await,
                }
            }
        }

        self.local.fixed_status(identifier, max_requests, window_ms).await
    }

    /// Clear both shared and local state for the identifier.
    ///
    /// Used for administrative overrides and tests. A shared-store failure
    /// here degrades like any other; the local record is always cleared.
    pub async fn reset(&self, identifier: &str) {
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.reset(identifier).await {
                self.mark_degraded("reset", &e).await;
            }
        }
        self.local.remove(identifier).await;
    }

    /// Resolve shared-store availability, probing when the cached result has
    /// expired. The lock is held across the probe so concurrent callers do
    /// not stampede the store.
    async fn shared_available(&self, shared: &dyn RateLimitBackend) -> bool {
        let mut health = self.health.lock().await;

        let cache_fresh = health
            .checked_at
            .map(|at| at.elapsed() < PROBE_CACHE_INTERVAL)
            .unwrap_or(false);
        if cache_fresh && health.state != Availability::Unknown {
            return health.state == Availability::Healthy;
        }

        let new_state = match shared.probe().await {
            Ok(()) => Availability::Healthy,
            Err(_) => Availability::Degraded,
        };

        if new_state != health.state {
            match new_state {
                Availability::Healthy => {
                    tracing::info!("shared rate-limit store available, sliding window in effect")
                }
                Availability::Degraded => tracing::warn!(
                    "shared rate-limit store unavailable, falling back to local fixed window"
                ),
                Availability::Unknown => {}
            }
        }

        health.state = new_state;
        health.checked_at = Some(Instant::now());
        new_state == Availability::Healthy
    }

    /// Record a runtime shared-store failure: flip to `Degraded` immediately
    /// without waiting for the probe cache to expire.
    async fn mark_degraded(&self, op: &str, err: &anyhow::Error) {
        let mut health = self.health.lock().await;
        if health.state != Availability::Degraded {
            tracing::warn!(
                "shared rate-limit store failed during {op}: {err:#}; falling back to local fixed window"
            );
        }
        health.state = Availability::Degraded;
        health.checked_at = Some(Instant::now());
    }

    /// Spawn the background sweep that prunes expired local records.
    ///
    /// Idempotent: a second call replaces the previous task.
    pub fn start_sweeper(self: &Arc<Self>) {
        let local = self.local.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            // The first tick completes immediately; the sweep has nothing to
            // do that early
            interval.tick().await;
            loop {
                interval.tick().await;
                local.sweep().await;
            }
        });

        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(previous) = sweeper.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stop the background sweep so the process can terminate cleanly.
    pub fn shutdown(&self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn local_only() -> RateLimiter {
        RateLimiter::new(None)
    }

    /// A shared backend that serves from an in-memory store until its fuse
    /// burns, then fails every call.
    struct FlakyBackend {
        inner: MemoryBackend,
        calls: AtomicU32,
        fail_after: u32,
    }

    impl FlakyBackend {
        fn new(fail_after: u32) -> Self {
            Self {
                inner: MemoryBackend::new(),
                calls: AtomicU32::new(0),
                fail_after,
            }
        }

        fn trip(&self) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.fail_after {
                anyhow::bail!("simulated store failure");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RateLimitBackend for FlakyBackend {
        async fn check(
            &self,
            identifier: &str,
            max_requests: u32,
            window_ms: i64,
        ) -> Result<RateLimitDecision> {
            self.trip()?;
            Ok(self.inner.fixed_check(identifier, max_requests, window_ms).await)
        }

        async fn status(
            &self,
            identifier: &str,
            max_requests: u32,
            window_ms: i64,
        ) -> Result<RateLimitDecision> {
            self.trip()?;
            Ok(self.inner.fixed_status(identifier, max_requests, window_ms).await)
        }

        async fn reset(&self, identifier: &str) -> Result<()> {
            self.trip()?;
            self.inner.remove(identifier).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concrete_scenario() {
        let limiter = local_only();

        // Four calls inside the window: three allowed with decreasing
        // remaining, the fourth denied
        let expectations = [(true, 2), (true, 1), (true, 0), (false, 0)];
        for (allowed, remaining) in expectations {
            let decision = limiter.check("ip:1.2.3.4", 3, 10_000).await;
            assert_eq!(decision.allowed, allowed);
            assert_eq!(decision.remaining, remaining);
        }
    }

    #[tokio::test]
    async fn test_capacity_returns_after_window() {
        let limiter = local_only();

        for _ in 0..3 {
            limiter.check("ip:1.2.3.4", 3, 100).await;
        }
        assert!(!limiter.check("ip:1.2.3.4", 3, 100).await.allowed);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.check("ip:1.2.3.4", 3, 100).await.allowed);
    }

    #[tokio::test]
    async fn test_status_does_not_consume() {
        let limiter = local_only();

        for _ in 0..10 {
            let status = limiter.status("ip:5.6.7.8", 2, 10_000).await;
            assert!(status.allowed);
            assert_eq!(status.remaining, 2);
        }

        assert!(limiter.check("ip:5.6.7.8", 2, 10_000).await.allowed);
        let status = limiter.status("ip:5.6.7.8", 2, 10_000).await;
        assert_eq!(status.remaining, 1);
    }

    #[tokio::test]
    async fn test_reset_restores_capacity() {
        let limiter = local_only();

        limiter.check("user:42", 1, 10_000).await;
        assert!(!limiter.check("user:42", 1, 10_000).await.allowed);

        limiter.reset("user:42").await;
        assert!(limiter.check("user:42", 1, 10_000).await.allowed);
    }

    #[tokio::test]
    async fn test_local_only_state_stays_unknown() {
        // Without a shared store there is nothing to probe
        let limiter = local_only();
        limiter.check("k", 1, 1000).await;
        assert_eq!(limiter.availability().await, Availability::Unknown);
    }

    #[tokio::test]
    async fn test_healthy_backend_serves_checks() {
        let limiter = RateLimiter::new(Some(Box::new(FlakyBackend::new(u32::MAX))));

        let decision = limiter.check("k", 3, 10_000).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(limiter.availability().await, Availability::Healthy);
    }

    #[tokio::test]
    async fn test_failure_mid_sequence_degrades_and_bounds_total() {
        // Shared store serves two checks, then dies. The failed call and
        // everything after it land on the local store.
        let limiter = RateLimiter::new(Some(Box::new(FlakyBackend::new(2))));
        let max = 3u32;

        let mut allowed = 0;
        for _ in 0..10 {
            if limiter.check("k", max, 10_000).await.allowed {
                allowed += 1;
            }
        }

        // Slack is bounded by one window per backend, never unlimited
        assert!(allowed <= 2 * max, "allowed {allowed} exceeds bounded slack");
        assert!(allowed >= max, "local fallback must keep serving");
        assert_eq!(limiter.availability().await, Availability::Degraded);

        // Exhausted on the local path: further calls are denied
        assert!(!limiter.check("k", max, 10_000).await.allowed);
    }

    #[tokio::test]
    async fn test_degraded_state_skips_shared_backend() {
        let backend = Box::new(FlakyBackend::new(0));
        let limiter = RateLimiter::new(Some(backend));

        // First call trips the failure and degrades
        limiter.check("k", 5, 10_000).await;
        assert_eq!(limiter.availability().await, Availability::Degraded);

        // Subsequent calls stay on the local path while the cached state is
        // fresh; they succeed without consulting the dead store
        for _ in 0..3 {
            assert!(limiter.check("k2", 5, 10_000).await.allowed);
        }
    }

    #[tokio::test]
    async fn test_degradation_is_invisible_to_callers() {
        let healthy = RateLimiter::new(None);
        let degraded = RateLimiter::new(Some(Box::new(FlakyBackend::new(0))));

        let a = healthy.check("k", 2, 10_000).await;
        let b = degraded.check("k", 2, 10_000).await;

        // Same shape, same fields; nothing reveals which backend answered
        assert_eq!(a.allowed, b.allowed);
        assert_eq!(a.remaining, b.remaining);
    }

    #[tokio::test]
    async fn test_sweeper_start_and_shutdown() {
        let limiter = Arc::new(local_only());
        limiter.start_sweeper();
        limiter.shutdown();

        // Shutdown is idempotent and the limiter still serves checks
        limiter.shutdown();
        assert!(limiter.check("k", 1, 1000).await.allowed);
    }

    #[tokio::test]
    async fn test_rate_limit_key_prefix() {
        assert_eq!(rate_limit_key("ip:1.2.3.4"), "rate_limit:ip:1.2.3.4");
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_redis_backed_limiter_is_healthy() {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let shared = RedisBackend::connect(&redis_url, Duration::from_secs(2))
            .await
            .unwrap();
        let limiter = RateLimiter::new(Some(Box::new(shared)));

        let id = format!("test:{}", uuid::Uuid::new_v4());
        let decision = limiter.check(&id, 3, 10_000).await;
        assert!(decision.allowed);
        assert_eq!(limiter.availability().await, Availability::Healthy);

        limiter.reset(&id).await;
    }
}
