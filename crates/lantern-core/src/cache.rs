//! Cache of verified results and fetched proof material.
//!
//! Only data that passed verification is stored here, so a hit is as good as
//! re-running the check. Each data type has its own table behind its own
//! lock; the entry bound and the LRU order span all tables. Eviction runs
//! inline on insert until the cache is back under its bound.

use crate::config::CacheConfig;
use crate::consensus::validator_chain::GenesisTrace;
use crate::types::consensus::ConsensusProof;
use crate::types::receipt::{Layer1EntryInclusion, MerkleReceipt};
use crate::types::report::CompleteProof;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Millisecond time source for expiry.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(duration_ms(by), Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub cached_at_ms: u64,
    pub expires_at_ms: u64,
    last_access: u64,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Per-insert options. `ttl: None` uses the cache default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub ttl: Option<Duration>,
}

impl StoreOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

/// Snapshot of the cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Counters {
    fn inc(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

struct Table<T> {
    name: &'static str,
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
}

impl<T> Table<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

/// The operations eviction needs, independent of the stored type.
trait Evictable: Send + Sync {
    fn name(&self) -> &'static str;
    fn len(&self) -> usize;
    /// Least recently used key and its access tick.
    fn oldest(&self) -> Option<(u64, String)>;
    /// Remove `key` if it was not touched since `tick`.
    fn evict(&self, key: &str, tick: u64) -> bool;
    fn prune_expired(&self, now_ms: u64) -> usize;
    fn clear(&self);
}

impl<T: Send + Sync> Evictable for Table<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn oldest(&self) -> Option<(u64, String)> {
        self.entries
            .read()
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, entry)| (entry.last_access, key.clone()))
    }

    fn evict(&self, key: &str, tick: u64) -> bool {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(entry) if entry.last_access == tick => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    fn prune_expired(&self, now_ms: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now_ms));
        before - entries.len()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

pub struct ProofCache {
    proofs: Table<CompleteProof>,
    receipts: Table<MerkleReceipt>,
    inclusions: Table<Layer1EntryInclusion>,
    consensus: Table<ConsensusProof>,
    validator_chains: Table<GenesisTrace>,
    default_ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    tick: AtomicU64,
    counters: Counters,
}

impl fmt::Debug for ProofCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofCache")
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .field("default_ttl", &self.default_ttl)
            .field("metrics", &self.metrics())
            .finish()
    }
}

impl ProofCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            proofs: Table::new("proofs"),
            receipts: Table::new("receipts"),
            inclusions: Table::new("inclusions"),
            consensus: Table::new("consensus"),
            validator_chains: Table::new("validator_chains"),
            default_ttl: config.default_ttl(),
            max_entries: config.max_entries.max(1),
            clock,
            tick: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Complete proofs keyed by account URL.
    pub fn proofs(&self) -> CacheTable<'_, CompleteProof> {
        self.table(&self.proofs)
    }

    /// Entry inclusion receipts keyed by chain position.
    pub fn receipts(&self) -> CacheTable<'_, MerkleReceipt> {
        self.table(&self.receipts)
    }

    pub fn inclusions(&self) -> CacheTable<'_, Layer1EntryInclusion> {
        self.table(&self.inclusions)
    }

    /// Quorum-verified block signatures keyed by partition and height.
    pub fn consensus(&self) -> CacheTable<'_, ConsensusProof> {
        self.table(&self.consensus)
    }

    pub fn validator_chains(&self) -> CacheTable<'_, GenesisTrace> {
        self.table(&self.validator_chains)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn len(&self) -> usize {
        self.tables().iter().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn clear(&self) {
        for table in self.tables() {
            table.clear();
        }
    }

    /// Drop expired entries from every table. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let pruned: usize = self.tables().iter().map(|t| t.prune_expired(now)).sum();
        Counters::inc(&self.counters.expirations, pruned as u64);
        pruned
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.counters.snapshot()
    }

    fn table<'a, T>(&'a self, table: &'a Table<T>) -> CacheTable<'a, T> {
        CacheTable { cache: self, table }
    }

    // Fixed order; eviction holds at most one table lock at a time.
    fn tables(&self) -> [&dyn Evictable; 5] {
        [
            &self.proofs,
            &self.receipts,
            &self.inclusions,
            &self.consensus,
            &self.validator_chains,
        ]
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Expired entries go first, then least recently used ones.
    fn enforce_bound(&self) {
        if self.len() <= self.max_entries {
            return;
        }
        self.prune_expired();

        while self.len() > self.max_entries {
            let victim = self
                .tables()
                .into_iter()
                .filter_map(|table| table.oldest().map(|(tick, key)| (tick, key, table)))
                .min_by_key(|(tick, _, _)| *tick);
            let Some((tick, key, table)) = victim else {
                break;
            };
            if table.evict(&key, tick) {
                Counters::inc(&self.counters.evictions, 1);
                debug!(table = table.name(), key = %key, "evicted least recently used cache entry");
            }
        }
    }
}

/// Typed view of one cache table.
pub struct CacheTable<'a, T> {
    cache: &'a ProofCache,
    table: &'a Table<T>,
}

impl<T: Clone + Send + Sync> CacheTable<'_, T> {
    /// A copy of the cached value. Counts a hit or miss and refreshes recency.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.cache.clock.now_ms();
        let mut entries = self.table.entries.write();

        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                Counters::inc(&self.cache.counters.misses, 1);
                return None;
            }
        };
        if expired {
            entries.remove(key);
            Counters::inc(&self.cache.counters.expirations, 1);
            Counters::inc(&self.cache.counters.misses, 1);
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.last_access = self.cache.next_tick();
        Counters::inc(&self.cache.counters.hits, 1);
        Some(entry.data.clone())
    }

    /// Like [`get`](Self::get) but read-only: no metrics, no recency update.
    pub fn peek(&self, key: &str) -> Option<T> {
        let now = self.cache.clock.now_ms();
        self.table
            .entries
            .read()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.data.clone())
    }

    /// The full entry including its timestamps, without touching recency.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<T>> {
        self.table.entries.read().get(key).cloned()
    }

    pub fn store(&self, key: impl Into<String>, data: T, options: StoreOptions) {
        let now = self.cache.clock.now_ms();
        let ttl = options.ttl.unwrap_or(self.cache.default_ttl);
        let entry = CacheEntry {
            data,
            cached_at_ms: now,
            expires_at_ms: now.saturating_add(duration_ms(ttl)),
            last_access: self.cache.next_tick(),
        };
        self.table.entries.write().insert(key.into(), entry);
        self.cache.enforce_bound();
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.table.entries.write().remove(key).map(|entry| entry.data)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.table.clear();
    }

    pub fn prune_expired(&self) -> usize {
        let pruned = self.table.prune_expired(self.cache.clock.now_ms());
        Counters::inc(&self.cache.counters.expirations, pruned as u64);
        pruned
    }
}
