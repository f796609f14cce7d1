//! Response Cache
//!
//! Stores normalized results keyed by the request facts that determine them.
//! Entries carry their own deadline so each analysis type can live for a
//! different time. The in-memory backend uses `mini_moka::sync::Cache` for
//! bounded, concurrent storage; an expired entry is evicted on read.

use async_trait::async_trait;
use mini_moka::sync::{Cache, ConcurrentCacheExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::models::analysis::AnalysisRequest;
use crate::models::analysis_result::NormalizedResult;
use crate::models::settings::CacheSettings;

/// Bump when the normalized shape changes so old entries stop matching.
const KEY_VERSION: &str = "v2";

// ---------------------------------------------------------------------------
// Cache key
// ---------------------------------------------------------------------------

/// SHA-256 over the analysis type, the case-folded subject, the context and
/// the date window. Provider preference is not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(request: &AnalysisRequest) -> Self {
        let (start, end) = request
            .date_range()
            .map(|r| {
                (
                    r.start.map(|d| d.to_string()).unwrap_or_default(),
                    r.end.map(|d| d.to_string()).unwrap_or_default(),
                )
            })
            .unwrap_or_default();
        let subject = request.target_subject().to_lowercase();
        let context = request.additional_context().map(str::trim).unwrap_or("");
        // JSON keeps field boundaries unambiguous
        let material = serde_json::to_vec(&(
            KEY_VERSION,
            request.analysis_type().as_str(),
            subject.as_str(),
            context,
            start.as_str(),
            end.as_str(),
        ))
        .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(&material);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Hit/miss counters and current size
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub hit_rate: f64,
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Fetch a live entry. Expired entries count as misses.
    async fn get(&self, key: &CacheKey) -> Option<NormalizedResult>;

    /// Store a result for `ttl`.
    async fn set(&self, key: CacheKey, value: NormalizedResult, ttl: Duration);

    fn stats(&self) -> CacheStats;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedEntry {
    value: NormalizedResult,
    expires_at: Instant,
}

pub struct MemoryResponseCache {
    entries: Cache<String, CachedEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryResponseCache {
    /// `max_ttl` bounds how long any entry can survive inside the store.
    pub fn new(max_entries: u64, max_ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(max_ttl)
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        let max_ttl = market_lens_core::AnalysisType::ALL
            .iter()
            .map(|t| settings.ttl_for(*t))
            .max()
            .unwrap_or(Duration::from_secs(3_600));
        Self::new(settings.max_entries, max_ttl)
    }

    /// Number of stored entries, after running pending maintenance.
    pub fn entry_count(&self) -> u64 {
        self.entries.sync();
        self.entries.entry_count()
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.sync();
    }

    fn lookup(&self, key: &CacheKey) -> Option<NormalizedResult> {
        let entry = self.entries.get(&key.0)?;
        if Instant::now() >= entry.expires_at {
            self.entries.invalidate(&key.0);
            tracing::debug!(key = %key, "cache entry expired");
            return None;
        }
        Some(entry.value)
    }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
    async fn get(&self, key: &CacheKey) -> Option<NormalizedResult> {
        let found = self.lookup(key);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    async fn set(&self, key: CacheKey, value: NormalizedResult, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let entry = CachedEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.0, entry);
    }

    fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            entries: self.entry_count(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

// Compile-time assertion that MemoryResponseCache is Send + Sync.
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn assert_memory_cache() {
        assert_send_sync::<MemoryResponseCache>();
    }
};
