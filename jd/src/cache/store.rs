//! ResultCache - TTL memoization with single-flight de-duplication

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as FlightLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::JobError;

use super::fingerprint::Fingerprint;

/// Result cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default time-to-live for entries, in seconds
    #[serde(rename = "ttl-secs")]
    pub ttl_secs: u64,

    /// Interval of the background expiry sweep, in seconds
    #[serde(rename = "sweep-interval-secs")]
    pub sweep_interval_secs: u64,

    /// How long a caller waits on another caller's computation, in milliseconds
    #[serde(rename = "wait-timeout-ms")]
    pub wait_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            sweep_interval_secs: 60,
            wait_timeout_ms: 30_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// A cached downstream result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub value: Value,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache counters
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub computes: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Membership in the single-flight group for one fingerprint
///
/// Dropping the last member removes the group.
struct Flight<'a> {
    cache: &'a ResultCache,
    fingerprint: Fingerprint,
    lock: Arc<FlightLock<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut inflight = self.cache.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        // map + this member
        if Arc::strong_count(&self.lock) <= 2
            && inflight
                .get(&self.fingerprint)
                .is_some_and(|current| Arc::ptr_eq(current, &self.lock))
        {
            inflight.remove(&self.fingerprint);
        }
    }
}

/// Fingerprint-keyed memoization of idempotent downstream calls
pub struct ResultCache {
    config: CacheConfig,
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
    inflight: Mutex<HashMap<Fingerprint, Arc<FlightLock<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        debug!(?config, "ResultCache::new: called");
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Live value for a fingerprint; an expired entry is evicted and missed
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(fingerprint) {
            Some(entry) if !entry.is_expired_at(now) => Some(entry.value.clone()),
            Some(_) => {
                debug!(%fingerprint, "ResultCache::get: evicting expired entry");
                entries.remove(fingerprint);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        }
    }

    /// Store a value for `ttl`
    pub fn insert(&self, fingerprint: Fingerprint, value: Value, ttl: Duration) {
        debug!(%fingerprint, ?ttl, "ResultCache::insert: called");
        let now = Instant::now();
        let entry = CacheEntry {
            fingerprint,
            value,
            created_at: now,
            expires_at: now + ttl,
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(fingerprint, entry);
    }

    /// Drop an entry; returns whether one existed
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        debug!(%fingerprint, "ResultCache::invalidate: called");
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(fingerprint).is_some()
    }

    fn join_flight(&self, fingerprint: Fingerprint) -> Flight<'_> {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = inflight.entry(fingerprint).or_default().clone();
        Flight {
            cache: self,
            fingerprint,
            lock,
        }
    }

    /// Return the cached value or compute it once across concurrent callers
    ///
    /// Callers with the same fingerprint queue behind the first one and observe
    /// its stored result. Failed computations are not stored, so the next
    /// waiter computes again. Waiting is bounded by the configured wait timeout.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: Fingerprint, ttl: Duration, compute: F) -> Result<Value, JobError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, JobError>>,
    {
        debug!(%fingerprint, "ResultCache::get_or_compute: called");
        if let Some(value) = self.get(&fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let flight = self.join_flight(fingerprint);
        let wait = self.config.wait_timeout();
        let _guard = match tokio::time::timeout(wait, flight.lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(%fingerprint, ?wait, "Timed out waiting on in-flight computation");
                return Err(JobError::Timeout(wait));
            }
        };

        // Another caller may have finished while we waited
        if let Some(value) = self.get(&fingerprint) {
            debug!(%fingerprint, "ResultCache::get_or_compute: coalesced");
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.computes.fetch_add(1, Ordering::Relaxed);
        let result = compute().await;
        match &result {
            Ok(value) => self.insert(fingerprint, value.clone(), ttl),
            Err(e) => debug!(%fingerprint, error = %e, "ResultCache::get_or_compute: not caching failure"),
        }
        result
    }

    /// Remove every expired entry; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - entries.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        debug!(removed, remaining = entries.len(), "ResultCache::sweep_expired: done");
        removed
    }

    /// Run `sweep_expired` every sweep interval until `shutdown` fires
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            info!(?period, "Cache sweeper started");
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.sweep_expired();
                    }
                }
            }
            debug!("Cache sweeper stopped");
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computes: self.computes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn cache() -> ResultCache {
        ResultCache::new(CacheConfig::default())
    }

    fn fp(n: u32) -> Fingerprint {
        Fingerprint::of("analysis", &json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_compute(fp(1), Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"score": 0.9}))
                })
                .await
                .unwrap();
            assert_eq!(value["score"], 0.9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.computes, 1);
        assert_eq!(cache.inflight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss() {
        let cache = cache();
        cache.insert(fp(1), json!(1), Duration::from_secs(10));
        assert_eq!(cache.get(&fp(1)), Some(json!(1)));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get(&fp(1)), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = cache();
        let err = cache
            .get_or_compute(fp(1), Duration::from_secs(60), || async {
                Err(JobError::Network("reset".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Network(_)));
        assert!(cache.is_empty());

        let value = cache
            .get_or_compute(fp(1), Duration::from_secs(60), || async { Ok(json!("ok")) })
            .await
            .unwrap();
        assert_eq!(value, json!("ok"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_computes_once() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(fp(7), Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!({"bias": 0.12}))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap()["bias"], 0.12);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.inflight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_times_out() {
        let cache = Arc::new(ResultCache::new(CacheConfig {
            wait_timeout_ms: 100,
            ..Default::default()
        }));

        let slow = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(fp(3), Duration::from_secs(60), || async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(json!(3))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = cache
            .get_or_compute(fp(3), Duration::from_secs(60), || async { Ok(json!("never")) })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Timeout(_)));
        assert_eq!(slow.await.unwrap().unwrap(), json!(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_and_invalidate() {
        let cache = cache();
        cache.insert(fp(1), json!(1), Duration::from_secs(1));
        cache.insert(fp(2), json!(2), Duration::from_secs(100));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate(&fp(2)));
        assert!(!cache.invalidate(&fp(2)));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let cache = Arc::new(ResultCache::new(CacheConfig {
            sweep_interval_secs: 1,
            ..Default::default()
        }));
        let shutdown = CancellationToken::new();
        let handle = cache.spawn_sweeper(shutdown.clone());

        cache.insert(fp(1), json!(1), Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(cache.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
