// src/core/cache.rs

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::core::domain::DomainName;
use crate::core::report::AssessmentReport;

struct CacheEntry {
    report: Arc<AssessmentReport>,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

/// A report served from the cache, with how long ago it was stored.
#[derive(Debug, Clone)]
pub struct CachedReport {
    pub report: Arc<AssessmentReport>,
    pub age: Duration,
}

/// Reports keyed by normalized domain. Sharded, so different domains never
/// contend; writes to the same domain are last-writer-wins.
#[derive(Default)]
pub struct ResponseCache {
    entries: DashMap<DomainName, CacheEntry>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh entry, if any. Expired entries are evicted here.
    pub fn get(&self, domain: &DomainName) -> Option<CachedReport> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(domain) {
            if !entry.is_expired(now) {
                debug!(target = %domain, "Cache hit.");
                return Some(CachedReport {
                    report: entry.report.clone(),
                    age: now.duration_since(entry.stored_at),
                });
            }
        }
        // The read guard is released above; re-check under the write lock so a
        // concurrent fresh `put` is not evicted.
        if self.entries.remove_if(domain, |_, entry| entry.is_expired(now)).is_some() {
            debug!(target = %domain, "Evicted expired cache entry.");
        }
        None
    }

    /// Stores `report`, replacing any previous entry for `domain` whole.
    pub fn put(&self, domain: DomainName, report: Arc<AssessmentReport>, ttl: Duration) {
        debug!(target = %domain, ttl_secs = ttl.as_secs(), "Caching report.");
        self.entries.insert(domain, CacheEntry { report, stored_at: Instant::now(), ttl });
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::DomainNormalizer;
    use std::collections::BTreeMap;

    fn domain(raw: &str) -> DomainName {
        DomainNormalizer::new("pt").normalize(raw).unwrap()
    }

    fn report(raw: &str, recs: &[&str]) -> Arc<AssessmentReport> {
        let recs = recs.iter().map(|r| r.to_string()).collect();
        Arc::new(AssessmentReport::build(domain(raw), BTreeMap::new(), recs).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_at_ttl() {
        let cache = ResponseCache::new();
        cache.put(domain("example"), report("example", &[]), Duration::from_secs(300));

        tokio::time::advance(Duration::from_secs(299)).await;
        let hit = cache.get(&domain("example")).unwrap();
        assert_eq!(hit.age, Duration::from_secs(299));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&domain("example")).is_none());
        assert_eq!(cache.entries.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn put_replaces_the_whole_entry() {
        let cache = ResponseCache::new();
        cache.put(domain("example"), report("example", &["old"]), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put(domain("example"), report("example", &["new"]), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;

        let hit = cache.get(&domain("example")).unwrap();
        assert_eq!(hit.report.recommendations, vec!["new"]);
        assert_eq!(hit.age, Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_entries() {
        let cache = ResponseCache::new();
        cache.put(domain("short"), report("short", &[]), Duration::from_secs(5));
        cache.put(domain("long"), report("long", &[]), Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(cache.sweep(), 1);
        assert!(cache.get(&domain("long")).is_some());
    }
}
