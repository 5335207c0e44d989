//! Local fallback rate-limit store
//!
//! Fixed-window counters held in process memory, used when the shared store
//! is unavailable. This is a deliberately weaker guarantee than the shared
//! sliding window - the window is fixed rather than trailing, and counts are
//! not shared across instances - but it keeps admission control correct
//! under partial failure instead of failing open.

use super::{RateLimitBackend, RateLimitDecision};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A fixed-window counter for one identifier
#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    count: u32,
    reset_time: i64,
}

/// In-memory fixed-window backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, FixedWindow>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and consume a slot for the identifier.
    ///
    /// A denied call does not increment the counter: once the window rolls
    /// over, rejected attempts leave no trace.
    pub async fn fixed_check(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> RateLimitDecision {
        let now = Utc::now().timestamp_millis();
        let mut records = self.records.write().await;

        let record = records.entry(identifier.to_string()).or_insert(FixedWindow {
            count: 0,
            reset_time: now + window_ms,
        });

        if now > record.reset_time {
            record.count = 0;
            record.reset_time = now + window_ms;
        }

        if record.count >= max_requests {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time: record.reset_time,
            };
        }

        record.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: max_requests.saturating_sub(record.count),
            reset_time: record.reset_time,
        }
    }

    /// Read the current window without consuming a slot.
    pub async fn fixed_status(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> RateLimitDecision {
        let now = Utc::now().timestamp_millis();
        let records = self.records.read().await;

        match records.get(identifier) {
            Some(record) if now <= record.reset_time => RateLimitDecision {
                allowed: record.count < max_requests,
                remaining: max_requests.saturating_sub(record.count),
                reset_time: record.reset_time,
            },
            _ => RateLimitDecision {
                allowed: max_requests > 0,
                remaining: max_requests,
                reset_time: now + window_ms,
            },
        }
    }

    /// Drop the record for an identifier.
    pub async fn remove(&self, identifier: &str) {
        self.records.write().await.remove(identifier);
    }

    /// Remove records whose window has passed.
    ///
    /// Bounds memory growth from a potentially unbounded set of distinct
    /// identifiers; called periodically by the limiter's sweeper task.
    pub async fn sweep(&self) {
        let now = Utc::now().timestamp_millis();
        self.records
            .write()
            .await
            .retain(|_, record| record.reset_time >= now);
    }

    /// Number of identifiers currently tracked.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no identifiers are tracked.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RateLimitBackend for MemoryBackend {
    async fn check(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> Result<RateLimitDecision> {
        Ok(self.fixed_check(identifier, max_requests, window_ms).await)
    }

    async fn status(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> Result<RateLimitDecision> {
        Ok(self.fixed_status(identifier, max_requests, window_ms).await)
    }

    async fn reset(&self, identifier: &str) -> Result<()> {
        self.remove(identifier).await;
        Ok(())
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// No call sequence can push the allowed count past the limit, and
        /// remaining always mirrors the consumed count.
        #[test]
        fn property_allowed_never_exceeds_limit(
            max_requests in 1u32..10,
            calls in 1usize..30,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                let backend = MemoryBackend::new();
                let mut allowed = 0u32;
                for _ in 0..calls {
                    let decision = backend.fixed_check("k", max_requests, 60_000).await;
                    if decision.allowed {
                        allowed += 1;
                        prop_assert_eq!(decision.remaining, max_requests - allowed);
                    } else {
                        prop_assert_eq!(decision.remaining, 0);
                    }
                }
                prop_assert!(allowed <= max_requests);
                prop_assert_eq!(allowed, max_requests.min(calls as u32));
                Ok(())
            })?;
        }
    }
}
