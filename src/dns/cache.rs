//! Hostname → address cache with a fixed time-to-live.
//!
//! Expired entries are never served: `resolve` checks expiry on every hit and
//! a single background sweep drops entries nobody asks for again.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::dns::lookup::{Lookup, SystemLookup};
use crate::observability::metrics;

/// The hostname could not be turned into an address.
#[derive(Debug, Error)]
#[error("failed to resolve {hostname}")]
pub struct ResolutionError {
    pub hostname: String,
    #[source]
    pub source: io::Error,
}

/// A cached lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub hostname: String,
    pub address: IpAddr,
    pub expires_at: Instant,
}

impl ResolvedHost {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Concurrent resolver cache shared by every session of a server.
///
/// Cloning is cheap and yields a handle onto the same entries.
#[derive(Clone)]
pub struct ResolverCache {
    entries: Arc<DashMap<String, ResolvedHost>>,
    lookup: Arc<dyn Lookup>,
    ttl: Duration,
}

impl std::fmt::Debug for ResolverCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ResolverCache {
    /// Create an empty cache backed by the platform resolver.
    pub fn new(ttl: Duration) -> Self {
        Self::with_lookup(ttl, Arc::new(SystemLookup))
    }

    /// Create an empty cache backed by a custom lookup.
    pub fn with_lookup(ttl: Duration, lookup: Arc<dyn Lookup>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            lookup,
            ttl,
        }
    }

    /// Resolve `hostname`, serving from the cache while the entry is live.
    ///
    /// Concurrent misses for the same name each perform their own lookup;
    /// the last insert wins.
    pub async fn resolve(&self, hostname: &str) -> Result<IpAddr, ResolutionError> {
        if let Some(address) = self.get(hostname) {
            metrics::record_lookup("hit");
            tracing::trace!(host = %hostname, address = %address, "Resolver cache hit");
            return Ok(address);
        }

        let address = match self.lookup.lookup(hostname).await {
            Ok(address) => address,
            Err(source) => {
                metrics::record_lookup("error");
                return Err(ResolutionError {
                    hostname: hostname.to_string(),
                    source,
                });
            }
        };
        metrics::record_lookup("miss");

        self.entries.insert(
            hostname.to_string(),
            ResolvedHost {
                hostname: hostname.to_string(),
                address,
                expires_at: Instant::now() + self.ttl,
            },
        );
        metrics::record_cache_size(self.entries.len());
        tracing::debug!(host = %hostname, address = %address, ttl = ?self.ttl, "Resolved host");

        Ok(address)
    }

    /// Return the live address for `hostname` without performing a lookup.
    /// An expired entry found on the way is removed.
    pub fn get(&self, hostname: &str) -> Option<IpAddr> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(hostname) {
            if !entry.is_expired(now) {
                return Some(entry.address);
            }
        }
        self.entries.remove_if(hostname, |_, entry| entry.is_expired(now));
        None
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let remaining = self.entries.len();
        metrics::record_cache_size(remaining);
        before.saturating_sub(remaining)
    }

    /// Sweep on a fixed interval until shutdown is signalled.
    pub async fn run_sweeper(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.sweep();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.len(), "Resolver cache swept");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Resolver sweeper received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::lookup::LookupFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps every name to one address and counts calls.
    struct CountingLookup {
        address: IpAddr,
        calls: AtomicUsize,
    }

    impl CountingLookup {
        fn new(address: [u8; 4]) -> Arc<Self> {
            Arc::new(Self {
                address: IpAddr::from(address),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Lookup for CountingLookup {
        fn lookup<'a>(&'a self, hostname: &'a str) -> LookupFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = if hostname.ends_with(".invalid") {
                Err(io::Error::new(io::ErrorKind::NotFound, "nxdomain"))
            } else {
                Ok(self.address)
            };
            Box::pin(async move {
                tokio::task::yield_now().await;
                result
            })
        }
    }

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn serves_hits_until_ttl_elapses() {
        let lookup = CountingLookup::new([93, 184, 216, 34]);
        let cache = ResolverCache::with_lookup(TTL, lookup.clone());

        let first = cache.resolve("example.com").await.unwrap();
        assert_eq!(lookup.calls(), 1);

        time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.resolve("example.com").await.unwrap(), first);
        assert_eq!(lookup.calls(), 1);

        time::advance(Duration::from_millis(999)).await;
        cache.resolve("example.com").await.unwrap();
        assert_eq!(lookup.calls(), 1);

        // Exactly at insertion + ttl the entry is expired.
        time::advance(Duration::from_millis(1)).await;
        cache.resolve("example.com").await.unwrap();
        assert_eq!(lookup.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn get_never_returns_expired_entry() {
        let cache = ResolverCache::with_lookup(TTL, CountingLookup::new([10, 0, 0, 1]));
        cache.resolve("example.org").await.unwrap();
        assert!(cache.get("example.org").is_some());

        time::advance(TTL).await;
        assert_eq!(cache.get("example.org"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failed_lookup_is_not_cached() {
        let lookup = CountingLookup::new([10, 0, 0, 1]);
        let cache = ResolverCache::with_lookup(TTL, lookup.clone());

        let err = cache.resolve("nowhere.invalid").await.unwrap_err();
        assert_eq!(err.hostname, "nowhere.invalid");
        assert!(cache.is_empty());

        assert!(cache.resolve("nowhere.invalid").await.is_err());
        assert_eq!(lookup.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_expired_entries() {
        let cache = ResolverCache::with_lookup(TTL, CountingLookup::new([10, 0, 0, 1]));
        cache.resolve("old.example").await.unwrap();

        time::advance(Duration::from_secs(20)).await;
        cache.resolve("new.example").await.unwrap();

        time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new.example").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_in_background_and_stops_on_shutdown() {
        let cache = ResolverCache::with_lookup(TTL, CountingLookup::new([10, 0, 0, 1]));
        cache.resolve("example.com").await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let sweeper = tokio::spawn(cache.clone().run_sweeper(Duration::from_secs(5), rx));

        time::sleep(TTL + Duration::from_secs(5)).await;
        assert!(cache.is_empty());

        tx.send(()).unwrap();
        sweeper.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cold_resolves_leave_one_entry() {
        let lookup = CountingLookup::new([93, 184, 216, 34]);
        let cache = ResolverCache::with_lookup(TTL, lookup.clone());

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve("example.com").await.unwrap() })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), IpAddr::from([93, 184, 216, 34]));
        }
        assert_eq!(cache.len(), 1);
        assert!(lookup.calls() >= 1);
    }
}
